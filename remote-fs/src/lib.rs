//! Uniform filesystem abstraction over local host, SFTP endpoints, and
//! container filesystems, plus the pooled SSH clients that back the remote
//! variants.
//!
//! All paths are absolute POSIX paths. Listing order is directories first,
//! then case-insensitive name, on every backend. Content I/O goes through
//! [`FsReader`]/[`FsWriter`] so callers stream without caring where the
//! bytes live; the container backend additionally exposes tar streaming
//! (`tar_dir`/`untar_dir`) as an optional capability.

pub mod container;
pub mod docker;
pub mod local;
pub mod pool;
pub mod registry;
pub mod sftp;

use async_trait::async_trait;
use thiserror::Error;

pub use container::ContainerFs;
pub use docker::{DockerExecutor, ExecOutput, LocalDockerExecutor, SshDockerExecutor};
pub use local::LocalFs;
pub use pool::{SshAssetConfig, SshPool};
pub use registry::{AssetEndpoint, AssetResolver, Endpoint, FsRegistry};
pub use sftp::SftpFs;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ssh: {0}")]
    Ssh(String),
    #[error("docker: {0}")]
    Docker(String),
    #[error("{0}")]
    Other(String),
}

/// One directory entry or stat result.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FsEntry {
    pub name: String,
    /// Absolute POSIX path.
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    /// `rwx` style mode string, e.g. `drwxr-x---`.
    pub mode: String,
    /// Milliseconds since Unix epoch; 0 when the backend cannot tell.
    pub modified_ms: i64,
}

/// Chunked byte source returned by `open_read` and `tar_dir`.
#[async_trait]
pub trait FsReader: Send {
    /// Next chunk, or `None` at end of stream.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, FsError>;

    async fn read_to_end(&mut self) -> Result<Vec<u8>, FsError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Chunked byte sink returned by `open_write`. Callers must `close` to make
/// the write durable; dropping an unclosed writer may lose buffered bytes.
#[async_trait]
pub trait FsWriter: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), FsError>;
    async fn close(&mut self) -> Result<(), FsError>;
}

/// The uniform filesystem contract (spec'd operations over absolute POSIX paths).
#[async_trait]
pub trait RemoteFs: Send + Sync {
    /// Ordered entries of a directory: directories first, then
    /// case-insensitive name. Hidden entries (`.`-prefixed) are skipped
    /// unless `include_hidden`.
    async fn list_dir(&self, path: &str, include_hidden: bool) -> Result<Vec<FsEntry>, FsError>;

    async fn stat(&self, path: &str) -> Result<FsEntry, FsError>;

    async fn mkdir_all(&self, path: &str) -> Result<(), FsError>;

    /// Removes a file or directory tree.
    async fn remove(&self, path: &str) -> Result<(), FsError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    async fn open_read(&self, path: &str) -> Result<Box<dyn FsReader>, FsError>;

    /// `overwrite = false` fails with [`FsError::AlreadyExists`] when the
    /// path exists, without truncating it.
    async fn open_write(&self, path: &str, overwrite: bool) -> Result<Box<dyn FsWriter>, FsError>;

    /// Streams a POSIX tar archive of `path`. Optional capability.
    async fn tar_dir(&self, _path: &str) -> Result<Box<dyn FsReader>, FsError> {
        Err(FsError::Unsupported("tar_dir"))
    }

    /// Extracts a POSIX tar archive into `path`, skipping entries that would
    /// escape it. Optional capability.
    async fn untar_dir(
        &self,
        _path: &str,
        _archive: Box<dyn FsReader>,
    ) -> Result<(), FsError> {
        Err(FsError::Unsupported("untar_dir"))
    }

    /// Preferred starting directory. Optional capability.
    async fn pwd(&self) -> Result<String, FsError> {
        Err(FsError::Unsupported("pwd"))
    }
}

/// Sorts entries in the uniform listing order.
pub(crate) fn sort_entries(entries: &mut [FsEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// `rwx` string from a Unix mode word, with the directory bit first.
pub(crate) fn mode_string(mode: u32, is_dir: bool) -> String {
    let mut s = String::with_capacity(10);
    s.push(if is_dir { 'd' } else { '-' });
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

/// In-memory reader over an already-materialized buffer.
pub struct BufReaderChunks {
    buf: Vec<u8>,
    pos: usize,
    chunk: usize,
}

impl BufReaderChunks {
    pub fn new(buf: Vec<u8>) -> Self {
        BufReaderChunks {
            buf,
            pos: 0,
            chunk: 64 * 1024,
        }
    }
}

#[async_trait]
impl FsReader for BufReaderChunks {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, FsError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let end = (self.pos + self.chunk).min(self.buf.len());
        let out = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> FsEntry {
        FsEntry {
            name: name.to_string(),
            path: format!("/{}", name),
            is_dir,
            size: 0,
            mode: String::new(),
            modified_ms: 0,
        }
    }

    #[test]
    fn sort_puts_directories_first_case_insensitive() {
        let mut entries = vec![
            entry("zebra.txt", false),
            entry("Apple", true),
            entry("banana", true),
            entry("Alpha.txt", false),
        ];
        sort_entries(&mut entries);
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Apple", "banana", "Alpha.txt", "zebra.txt"]);
    }

    #[test]
    fn mode_string_formats_bits() {
        assert_eq!(mode_string(0o750, true), "drwxr-x---");
        assert_eq!(mode_string(0o600, false), "-rw-------");
    }

    #[tokio::test]
    async fn buf_reader_chunks_round_trip() {
        let data = vec![7u8; 200_000];
        let mut reader = BufReaderChunks::new(data.clone());
        let back = reader.read_to_end().await.unwrap();
        assert_eq!(back, data);
    }
}
