//! Container backend: metadata via small `docker exec` commands, content via
//! tar on stdin/stdout.
//!
//! Metadata commands: `stat -c '%n|%F|%s|%A|%Y'`, `find -maxdepth 1`,
//! `mkdir -p`, `rm -rf`, `mv`. Content: `tar -cf - -C dir name` out and
//! `tar -xf - -C dir` in. `docker cp` is never used.

use std::sync::Arc;

use async_trait::async_trait;

use crate::docker::DockerExecutor;
use crate::{sort_entries, BufReaderChunks, FsEntry, FsError, FsReader, FsWriter, RemoteFs};

const STAT_FORMAT: &str = "%n|%F|%s|%A|%Y";

/// Filesystem of one running container, driven through a [`DockerExecutor`].
pub struct ContainerFs {
    executor: Arc<dyn DockerExecutor>,
    container_id: String,
}

impl ContainerFs {
    pub fn new(executor: Arc<dyn DockerExecutor>, container_id: impl Into<String>) -> Self {
        ContainerFs {
            executor,
            container_id: container_id.into(),
        }
    }

    async fn exec(&self, argv: &[String], stdin: Option<Vec<u8>>) -> Result<crate::ExecOutput, FsError> {
        self.executor.exec(&self.container_id, argv, stdin).await
    }

    async fn exec_ok(&self, argv: &[String]) -> Result<crate::ExecOutput, FsError> {
        let out = self.exec(argv, None).await?;
        if !out.ok() {
            return Err(classify_stderr(&out.stderr_str()));
        }
        Ok(out)
    }
}

fn classify_stderr(stderr: &str) -> FsError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such file or directory") {
        FsError::NotFound(stderr.trim().to_string())
    } else if lower.contains("permission denied") {
        FsError::AccessDenied(stderr.trim().to_string())
    } else if lower.contains("not a directory") {
        FsError::NotADirectory(stderr.trim().to_string())
    } else {
        FsError::Docker(stderr.trim().to_string())
    }
}

/// Parses one `stat -c '%n|%F|%s|%A|%Y'` line.
fn parse_stat_line(line: &str) -> Option<FsEntry> {
    // Name may contain '|'; the trailing four fields never do.
    let mut fields: Vec<&str> = line.rsplitn(5, '|').collect();
    if fields.len() != 5 {
        return None;
    }
    fields.reverse();
    let (path, file_type, size, mode, mtime) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);
    let is_dir = file_type == "directory";
    let name = path.rsplit('/').next().unwrap_or(path).to_string();
    Some(FsEntry {
        name: if name.is_empty() { "/".to_string() } else { name },
        path: path.to_string(),
        is_dir,
        size: size.parse().unwrap_or(0),
        mode: mode.to_string(),
        modified_ms: mtime.parse::<i64>().unwrap_or(0) * 1000,
    })
}

fn split_parent(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

struct ContainerWriter {
    executor: Arc<dyn DockerExecutor>,
    container_id: String,
    parent: String,
    name: String,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl FsWriter for ContainerWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), FsError> {
        if self.closed {
            return Err(FsError::Other("writer already closed".into()));
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FsError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let name = self.name.clone();
        let data = std::mem::take(&mut self.buf);
        // Tar needs the entry size up front, hence the buffered close.
        let archive = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, FsError> {
            let mut builder = tar::Builder::new(Vec::new());
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o600);
            header.set_mtime(0);
            header.set_cksum();
            builder
                .append_data(&mut header, &name, data.as_slice())
                .map_err(FsError::Io)?;
            builder.into_inner().map_err(FsError::Io)
        })
        .await
        .map_err(|e| FsError::Other(format!("tar task: {}", e)))??;

        let args = argv(&["tar", "-xf", "-", "-C", &self.parent]);
        let out = self
            .executor
            .exec(&self.container_id, &args, Some(archive))
            .await?;
        if !out.ok() {
            return Err(classify_stderr(&out.stderr_str()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for ContainerFs {
    async fn list_dir(&self, path: &str, include_hidden: bool) -> Result<Vec<FsEntry>, FsError> {
        let dir = self.stat(path).await?;
        if !dir.is_dir {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let args = argv(&[
            "find",
            path,
            "-maxdepth",
            "1",
            "-mindepth",
            "1",
            "-exec",
            "stat",
            "-c",
            STAT_FORMAT,
            "{}",
            ";",
        ]);
        let out = self.exec_ok(&args).await?;
        let mut entries = Vec::new();
        for line in out.stdout_str().lines() {
            let Some(entry) = parse_stat_line(line) else { continue };
            if !include_hidden && entry.name.starts_with('.') {
                continue;
            }
            entries.push(entry);
        }
        sort_entries(&mut entries);
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FsEntry, FsError> {
        let args = argv(&["stat", "-c", STAT_FORMAT, path]);
        let out = self.exec_ok(&args).await?;
        parse_stat_line(out.stdout_str().trim_end())
            .ok_or_else(|| FsError::Docker(format!("unparseable stat output for {}", path)))
    }

    async fn mkdir_all(&self, path: &str) -> Result<(), FsError> {
        self.exec_ok(&argv(&["mkdir", "-p", path])).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), FsError> {
        // rm -rf is silent on missing paths; surface NotFound ourselves.
        self.stat(path).await?;
        self.exec_ok(&argv(&["rm", "-rf", path])).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        self.exec_ok(&argv(&["mv", from, to])).await?;
        Ok(())
    }

    async fn open_read(&self, path: &str) -> Result<Box<dyn FsReader>, FsError> {
        let (parent, name) = split_parent(path);
        let args = argv(&["tar", "-cf", "-", "-C", &parent, &name]);
        let out = self.exec(&args, None).await?;
        if !out.ok() {
            return Err(classify_stderr(&out.stderr_str()));
        }
        let name_clone = name.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, FsError> {
            let mut ar = tar::Archive::new(std::io::Cursor::new(out.stdout));
            for entry in ar.entries().map_err(FsError::Io)? {
                let mut entry = entry.map_err(FsError::Io)?;
                let entry_name = entry
                    .path()
                    .map_err(FsError::Io)?
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if entry_name == name_clone {
                    use std::io::Read;
                    let mut data = Vec::new();
                    entry.read_to_end(&mut data).map_err(FsError::Io)?;
                    return Ok(data);
                }
            }
            Err(FsError::NotFound(name_clone))
        })
        .await
        .map_err(|e| FsError::Other(format!("untar task: {}", e)))??;
        Ok(Box::new(BufReaderChunks::new(bytes)))
    }

    async fn open_write(&self, path: &str, overwrite: bool) -> Result<Box<dyn FsWriter>, FsError> {
        if !overwrite && self.stat(path).await.is_ok() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let (parent, name) = split_parent(path);
        self.mkdir_all(&parent).await?;
        Ok(Box::new(ContainerWriter {
            executor: Arc::clone(&self.executor),
            container_id: self.container_id.clone(),
            parent,
            name,
            buf: Vec::new(),
            closed: false,
        }))
    }

    async fn tar_dir(&self, path: &str) -> Result<Box<dyn FsReader>, FsError> {
        let args = argv(&["tar", "-cf", "-", "-C", path, "."]);
        let out = self.exec(&args, None).await?;
        if !out.ok() {
            return Err(classify_stderr(&out.stderr_str()));
        }
        Ok(Box::new(BufReaderChunks::new(out.stdout)))
    }

    async fn untar_dir(
        &self,
        path: &str,
        mut archive: Box<dyn FsReader>,
    ) -> Result<(), FsError> {
        self.mkdir_all(path).await?;
        let bytes = archive.read_to_end().await?;
        let args = argv(&["tar", "-xf", "-", "-C", path]);
        let out = self.exec(&args, Some(bytes)).await?;
        if !out.ok() {
            return Err(classify_stderr(&out.stderr_str()));
        }
        Ok(())
    }

    async fn pwd(&self) -> Result<String, FsError> {
        let out = self.exec_ok(&argv(&["pwd"])).await?;
        Ok(out.stdout_str().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecOutput;
    use std::sync::Mutex;

    #[test]
    fn parse_stat_line_handles_fields() {
        let entry = parse_stat_line("/tmp/x.bin|regular file|1048576|-rw-r--r--|1700000000").unwrap();
        assert_eq!(entry.name, "x.bin");
        assert_eq!(entry.path, "/tmp/x.bin");
        assert!(!entry.is_dir);
        assert_eq!(entry.size, 1_048_576);
        assert_eq!(entry.mode, "-rw-r--r--");
        assert_eq!(entry.modified_ms, 1_700_000_000_000);

        let dir = parse_stat_line("/srv|directory|4096|drwxr-xr-x|1700000001").unwrap();
        assert!(dir.is_dir);
        assert_eq!(dir.name, "srv");
    }

    #[test]
    fn parse_stat_line_keeps_pipes_in_name() {
        let entry = parse_stat_line("/tmp/a|b.txt|regular file|3|-rw-------|5").unwrap();
        assert_eq!(entry.path, "/tmp/a|b.txt");
        assert_eq!(entry.name, "a|b.txt");
    }

    #[test]
    fn split_parent_cases() {
        assert_eq!(split_parent("/tmp/x.bin"), ("/tmp".into(), "x.bin".into()));
        assert_eq!(split_parent("/x"), ("/".into(), "x".into()));
    }

    /// Records exec calls and replays scripted outputs.
    struct ScriptedExecutor {
        calls: Mutex<Vec<(Vec<String>, Option<Vec<u8>>)>>,
        outputs: Mutex<Vec<ExecOutput>>,
    }

    #[async_trait]
    impl DockerExecutor for ScriptedExecutor {
        async fn exec(
            &self,
            _container_id: &str,
            argv: &[String],
            stdin: Option<Vec<u8>>,
        ) -> Result<ExecOutput, FsError> {
            self.calls.lock().unwrap().push((argv.to_vec(), stdin));
            Ok(self.outputs.lock().unwrap().remove(0))
        }
    }

    fn ok_out(stdout: &[u8]) -> ExecOutput {
        ExecOutput {
            stdout: stdout.to_vec(),
            stderr: Vec::new(),
            exit_code: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_close_sends_tar_on_stdin() {
        let executor = Arc::new(ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
            outputs: Mutex::new(vec![
                // overwrite pre-check stat: missing
                ExecOutput {
                    stdout: Vec::new(),
                    stderr: b"stat: cannot statx '/tmp/f': No such file or directory".to_vec(),
                    exit_code: 1,
                },
                ok_out(b""), // mkdir -p
                ok_out(b""), // tar -xf
            ]),
        });
        let fs = ContainerFs::new(executor.clone(), "c1");
        let mut w = fs.open_write("/tmp/f", false).await.unwrap();
        w.write_chunk(b"payload").await.unwrap();
        w.close().await.unwrap();

        let calls = executor.calls.lock().unwrap();
        let (tar_args, stdin) = &calls[2];
        assert_eq!(tar_args[..5], ["tar", "-xf", "-", "-C", "/tmp"]);
        let archive = stdin.clone().unwrap();
        let mut ar = tar::Archive::new(std::io::Cursor::new(archive));
        let mut entries = ar.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_string_lossy(), "f");
        use std::io::Read;
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        assert_eq!(data, b"payload");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_read_extracts_entry_from_tar() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_ustar();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "x.bin", &b"bytes"[..])
            .unwrap();
        let archive = builder.into_inner().unwrap();

        let executor = Arc::new(ScriptedExecutor {
            calls: Mutex::new(Vec::new()),
            outputs: Mutex::new(vec![ok_out(&archive)]),
        });
        let fs = ContainerFs::new(executor, "c1");
        let mut r = fs.open_read("/tmp/x.bin").await.unwrap();
        assert_eq!(r.read_to_end().await.unwrap(), b"bytes");
    }
}
