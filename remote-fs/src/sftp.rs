//! SFTP backend: thin adapter over a pooled SFTP client.
//!
//! libssh2 calls are blocking; short metadata calls and chunked file I/O run
//! under `block_in_place`, so this backend expects the multi-thread runtime
//! (the same trade the SQLite store makes).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pool::{SshAssetConfig, SshPool};
use crate::{mode_string, sort_entries, FsEntry, FsError, FsReader, FsWriter, RemoteFs};

// LIBSSH2_FX_* status codes surfaced through ssh2::ErrorCode::SFTP.
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_FILE_ALREADY_EXISTS: i32 = 11;

/// Filesystem of one SSH asset, via its pooled SFTP client.
pub struct SftpFs {
    pool: Arc<SshPool>,
    asset: SshAssetConfig,
}

impl SftpFs {
    pub fn new(pool: Arc<SshPool>, asset: SshAssetConfig) -> Self {
        SftpFs { pool, asset }
    }

    async fn client(&self) -> Result<Arc<ssh2::Sftp>, FsError> {
        self.pool.sftp(&self.asset).await
    }
}

fn map_ssh_err(path: &str, e: ssh2::Error) -> FsError {
    match e.code() {
        ssh2::ErrorCode::SFTP(FX_NO_SUCH_FILE) => FsError::NotFound(path.to_string()),
        ssh2::ErrorCode::SFTP(FX_PERMISSION_DENIED) => FsError::AccessDenied(path.to_string()),
        ssh2::ErrorCode::SFTP(FX_FILE_ALREADY_EXISTS) => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Ssh(format!("{}: {}", path, e)),
    }
}

fn entry_from_stat(name: &str, path: &str, stat: &ssh2::FileStat) -> FsEntry {
    let is_dir = stat.is_dir();
    FsEntry {
        name: name.to_string(),
        path: path.to_string(),
        is_dir,
        size: stat.size.unwrap_or(0),
        mode: mode_string(stat.perm.unwrap_or(0) & 0o7777, is_dir),
        modified_ms: stat.mtime.map(|s| s as i64 * 1000).unwrap_or(0),
    }
}

struct SftpReader {
    file: ssh2::File,
}

#[async_trait]
impl FsReader for SftpReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, FsError> {
        use std::io::Read;
        let mut buf = vec![0u8; 64 * 1024];
        let n = tokio::task::block_in_place(|| self.file.read(&mut buf)).map_err(FsError::Io)?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

struct SftpWriter {
    file: Option<ssh2::File>,
}

#[async_trait]
impl FsWriter for SftpWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), FsError> {
        use std::io::Write;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FsError::Other("writer already closed".into()))?;
        tokio::task::block_in_place(|| file.write_all(data)).map_err(FsError::Io)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FsError> {
        use std::io::Write;
        if let Some(mut file) = self.file.take() {
            tokio::task::block_in_place(move || {
                file.flush()?;
                let _ = file.fsync();
                Ok::<(), std::io::Error>(())
            })
            .map_err(FsError::Io)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn list_dir(&self, path: &str, include_hidden: bool) -> Result<Vec<FsEntry>, FsError> {
        let sftp = self.client().await?;
        let dir_stat = tokio::task::block_in_place(|| sftp.stat(Path::new(path)))
            .map_err(|e| map_ssh_err(path, e))?;
        if !dir_stat.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let raw = tokio::task::block_in_place(|| sftp.readdir(Path::new(path)))
            .map_err(|e| map_ssh_err(path, e))?;
        let mut entries = Vec::with_capacity(raw.len());
        for (child, stat) in raw {
            let name = child
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if name.is_empty() || (!include_hidden && name.starts_with('.')) {
                continue;
            }
            let child_path = format!("{}/{}", path.trim_end_matches('/'), name);
            entries.push(entry_from_stat(&name, &child_path, &stat));
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FsEntry, FsError> {
        let sftp = self.client().await?;
        let stat = tokio::task::block_in_place(|| sftp.stat(Path::new(path)))
            .map_err(|e| map_ssh_err(path, e))?;
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "/".to_string());
        Ok(entry_from_stat(&name, path, &stat))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        let sftp = self.client().await?;
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            let exists =
                tokio::task::block_in_place(|| sftp.stat(Path::new(&current))).is_ok();
            if exists {
                continue;
            }
            tokio::task::block_in_place(|| sftp.mkdir(Path::new(&current), 0o700))
                .map_err(|e| map_ssh_err(&current, e))?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let sftp = self.client().await?;
        let stat = tokio::task::block_in_place(|| sftp.stat(Path::new(path)))
            .map_err(|e| map_ssh_err(path, e))?;
        if stat.is_dir() {
            tokio::task::block_in_place(|| sftp.rmdir(Path::new(path)))
                .map_err(|e| map_ssh_err(path, e))
        } else {
            tokio::task::block_in_place(|| sftp.unlink(Path::new(path)))
                .map_err(|e| map_ssh_err(path, e))
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let sftp = self.client().await?;
        tokio::task::block_in_place(|| {
            sftp.rename(
                Path::new(from),
                Path::new(to),
                Some(ssh2::RenameFlags::OVERWRITE),
            )
        })
        .map_err(|e| map_ssh_err(from, e))
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn FsReader>, FsError> {
        let sftp = self.client().await?;
        let file = tokio::task::block_in_place(|| sftp.open(Path::new(path)))
            .map_err(|e| map_ssh_err(path, e))?;
        Ok(Box::new(SftpReader { file }))
    }

    async fn open_write(&self, path: &str, overwrite: bool) -> Result<Box<dyn FsWriter>, FsError> {
        use ssh2::OpenFlags;
        let sftp = self.client().await?;
        let flags = if overwrite {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
        } else {
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE
        };
        let file = tokio::task::block_in_place(|| {
            sftp.open_mode(Path::new(path), flags, 0o600, ssh2::OpenType::File)
        })
        .map_err(|e| map_ssh_err(path, e))?;
        Ok(Box::new(SftpWriter { file: Some(file) }))
    }

    async fn pwd(&self) -> Result<String, FsError> {
        let sftp = self.client().await?;
        let real = tokio::task::block_in_place(|| sftp.realpath(Path::new(".")))
            .map_err(|e| map_ssh_err(".", e))?;
        Ok(real.to_string_lossy().to_string())
    }
}
