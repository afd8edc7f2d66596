//! Local host backend. Paths are converted from POSIX to host form and
//! cleaned; `..` is not rejected (no sandbox at this layer). Writes create
//! parents mode 0700 and files mode 0600.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{mode_string, sort_entries, FsEntry, FsError, FsReader, FsWriter, RemoteFs};

/// The host filesystem.
#[derive(Clone, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        LocalFs
    }
}

/// Cleans a POSIX path textually: collapses separators, resolves `.` and
/// `..` (popping at most to the root). The result stays absolute.
pub fn clean_posix(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

fn host_path(path: &str) -> PathBuf {
    PathBuf::from(clean_posix(path))
}

fn entry_from_metadata(name: &str, path: &str, meta: &std::fs::Metadata) -> FsEntry {
    use std::os::unix::fs::PermissionsExt;
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    FsEntry {
        name: name.to_string(),
        path: path.to_string(),
        is_dir: meta.is_dir(),
        size: meta.len(),
        mode: mode_string(meta.permissions().mode(), meta.is_dir()),
        modified_ms,
    }
}

fn map_io(path: &str, e: std::io::Error) -> FsError {
    match e.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => FsError::AccessDenied(path.to_string()),
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io(e),
    }
}

struct FileReader {
    file: tokio::fs::File,
}

#[async_trait]
impl FsReader for FileReader {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, FsError> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

struct FileWriter {
    file: Option<tokio::fs::File>,
}

#[async_trait]
impl FsWriter for FileWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), FsError> {
        match self.file.as_mut() {
            Some(f) => Ok(f.write_all(data).await?),
            None => Err(FsError::Other("writer already closed".into())),
        }
    }

    async fn close(&mut self) -> Result<(), FsError> {
        if let Some(mut f) = self.file.take() {
            f.flush().await?;
            f.sync_all().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for LocalFs {
    async fn list_dir(&self, path: &str, include_hidden: bool) -> Result<Vec<FsEntry>, FsError> {
        let clean = clean_posix(path);
        let host = host_path(path);
        let meta = tokio::fs::metadata(&host)
            .await
            .map_err(|e| map_io(&clean, e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory(clean));
        }
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&host)
            .await
            .map_err(|e| map_io(&clean, e))?;
        while let Some(item) = dir.next_entry().await.map_err(FsError::Io)? {
            let name = item.file_name().to_string_lossy().to_string();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let child = format!("{}/{}", clean.trim_end_matches('/'), name);
            // Broken symlinks still get a listing row.
            match item.metadata().await {
                Ok(meta) => entries.push(entry_from_metadata(&name, &child, &meta)),
                Err(_) => entries.push(FsEntry {
                    name,
                    path: child,
                    is_dir: false,
                    size: 0,
                    mode: String::new(),
                    modified_ms: 0,
                }),
            }
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FsEntry, FsError> {
        let clean = clean_posix(path);
        let meta = tokio::fs::metadata(host_path(path))
            .await
            .map_err(|e| map_io(&clean, e))?;
        let name = Path::new(&clean)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "/".to_string());
        Ok(entry_from_metadata(&name, &clean, &meta))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        let clean = clean_posix(path);
        tokio::fs::create_dir_all(host_path(path))
            .await
            .map_err(|e| map_io(&clean, e))
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        let clean = clean_posix(path);
        let host = host_path(path);
        let meta = tokio::fs::metadata(&host)
            .await
            .map_err(|e| map_io(&clean, e))?;
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&host)
                .await
                .map_err(|e| map_io(&clean, e))
        } else {
            tokio::fs::remove_file(&host)
                .await
                .map_err(|e| map_io(&clean, e))
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let clean_from = clean_posix(from);
        tokio::fs::rename(host_path(from), host_path(to))
            .await
            .map_err(|e| map_io(&clean_from, e))
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn FsReader>, FsError> {
        let clean = clean_posix(path);
        let file = tokio::fs::File::open(host_path(path))
            .await
            .map_err(|e| map_io(&clean, e))?;
        Ok(Box::new(FileReader { file }))
    }

    async fn open_write(&self, path: &str, overwrite: bool) -> Result<Box<dyn FsWriter>, FsError> {
        let clean = clean_posix(path);
        let host = host_path(path);
        if let Some(parent) = host.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_parents_0700(parent).await?;
            }
        }
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true);
        if overwrite {
            opts.create(true).truncate(true);
        } else {
            opts.create_new(true);
        }
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let file = opts.open(&host).await.map_err(|e| map_io(&clean, e))?;
        Ok(Box::new(FileWriter { file: Some(file) }))
    }

    async fn tar_dir(&self, path: &str) -> Result<Box<dyn FsReader>, FsError> {
        let host = host_path(path);
        let buf = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, FsError> {
            let meta = std::fs::metadata(&host).map_err(|e| map_io(&host.to_string_lossy(), e))?;
            let mut builder = tar::Builder::new(Vec::new());
            if meta.is_dir() {
                builder
                    .append_dir_all(".", &host)
                    .map_err(FsError::Io)?;
            } else {
                let name = host
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let mut f = std::fs::File::open(&host).map_err(FsError::Io)?;
                builder.append_file(name, &mut f).map_err(FsError::Io)?;
            }
            builder.into_inner().map_err(FsError::Io)
        })
        .await
        .map_err(|e| FsError::Other(format!("tar task: {}", e)))?;
        Ok(Box::new(crate::BufReaderChunks::new(buf?)))
    }

    async fn untar_dir(
        &self,
        path: &str,
        mut archive: Box<dyn FsReader>,
    ) -> Result<(), FsError> {
        let host = host_path(path);
        let bytes = archive.read_to_end().await?;
        tokio::task::spawn_blocking(move || -> Result<(), FsError> {
            std::fs::create_dir_all(&host).map_err(FsError::Io)?;
            let mut ar = tar::Archive::new(std::io::Cursor::new(bytes));
            for entry in ar.entries().map_err(FsError::Io)? {
                let mut entry = entry.map_err(FsError::Io)?;
                // unpack_in refuses paths that escape the target directory;
                // those entries are skipped, not fatal.
                match entry.unpack_in(&host) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::Other => {
                        tracing::warn!("untar: skipping escaping entry: {}", e);
                    }
                    Err(e) => return Err(FsError::Io(e)),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| FsError::Other(format!("untar task: {}", e)))?
    }

    async fn pwd(&self) -> Result<String, FsError> {
        let cwd = std::env::current_dir().map_err(FsError::Io)?;
        Ok(cwd.to_string_lossy().to_string())
    }
}

async fn create_parents_0700(parent: &Path) -> Result<(), FsError> {
    use std::os::unix::fs::DirBuilderExt;
    let parent = parent.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&parent)
            .map_err(FsError::Io)
    })
    .await
    .map_err(|e| FsError::Other(format!("mkdir task: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_posix_resolves_dots() {
        assert_eq!(clean_posix("/a/b/../c//./d"), "/a/c/d");
        assert_eq!(clean_posix("/../.."), "/");
        assert_eq!(clean_posix("/"), "/");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new();
        let path = format!("{}/sub/file.txt", dir.path().display());
        let mut w = fs.open_write(&path, true).await.unwrap();
        w.write_chunk(b"hello ").await.unwrap();
        w.write_chunk(b"world").await.unwrap();
        w.close().await.unwrap();

        let mut r = fs.open_read(&path).await.unwrap();
        let data = r.read_to_end().await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_write_no_overwrite_fails_without_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new();
        let path = format!("{}/file.txt", dir.path().display());
        let mut w = fs.open_write(&path, true).await.unwrap();
        w.write_chunk(b"original").await.unwrap();
        w.close().await.unwrap();

        let err = match fs.open_write(&path, false).await {
            Err(e) => e,
            Ok(_) => panic!("expected open_write to fail"),
        };
        assert!(matches!(err, FsError::AlreadyExists(_)));
        let mut r = fs.open_read(&path).await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"original");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_dir_orders_dirs_first_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("bdir")).unwrap();
        std::fs::write(root.join("afile"), b"x").unwrap();
        std::fs::write(root.join(".hidden"), b"x").unwrap();

        let fs = LocalFs::new();
        let entries = fs
            .list_dir(&root.to_string_lossy(), false)
            .await
            .unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["bdir", "afile"]);

        let with_hidden = fs.list_dir(&root.to_string_lossy(), true).await.unwrap();
        assert_eq!(with_hidden.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_dir_on_file_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let fs = LocalFs::new();
        let err = fs.list_dir(&file.to_string_lossy(), false).await.unwrap_err();
        assert!(matches!(err, FsError::NotADirectory(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stat_missing_is_not_found() {
        let fs = LocalFs::new();
        let err = fs.stat("/definitely/not/here/xyz").await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tar_untar_round_trip() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir(src.path().join("inner")).unwrap();
        std::fs::write(src.path().join("inner/a.txt"), b"alpha").unwrap();
        std::fs::write(src.path().join("b.bin"), vec![0u8, 1, 2, 255]).unwrap();

        let fs = LocalFs::new();
        let archive = fs.tar_dir(&src.path().to_string_lossy()).await.unwrap();

        let dst = tempfile::tempdir().unwrap();
        fs.untar_dir(&dst.path().to_string_lossy(), archive)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dst.path().join("inner/a.txt")).unwrap(),
            b"alpha"
        );
        assert_eq!(
            std::fs::read(dst.path().join("b.bin")).unwrap(),
            vec![0u8, 1, 2, 255]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rename_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new();
        let a = format!("{}/a", dir.path().display());
        let b = format!("{}/b", dir.path().display());
        std::fs::write(&a, b"x").unwrap();
        fs.rename(&a, &b).await.unwrap();
        assert!(fs.stat(&a).await.is_err());
        fs.remove(&b).await.unwrap();
        assert!(fs.stat(&b).await.is_err());
        let err = fs.remove(&b).await.unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
    }
}
