//! Docker executors: run `docker exec` against a local daemon or over an SSH
//! session to a remote one. Content always moves as a tar stream on
//! stdin/stdout, never `docker cp`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;

use crate::pool::{SshAssetConfig, SshPool};
use crate::FsError;

/// Captured output of one executed command.
#[derive(Clone, Debug, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands inside a container. `argv` is passed through unshelled on
/// the local path; the SSH path quotes each element for the remote shell.
#[async_trait]
pub trait DockerExecutor: Send + Sync {
    /// `docker exec [-i] <container> argv...`, feeding `stdin` when present.
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, FsError>;
}

/// `docker` CLI against the local daemon via the host process table.
#[derive(Clone, Default)]
pub struct LocalDockerExecutor;

impl LocalDockerExecutor {
    pub fn new() -> Self {
        LocalDockerExecutor
    }
}

#[async_trait]
impl DockerExecutor for LocalDockerExecutor {
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, FsError> {
        use tokio::io::AsyncWriteExt;

        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("exec");
        if stdin.is_some() {
            cmd.arg("-i");
        }
        cmd.arg(container_id);
        cmd.args(argv);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::Docker("docker binary not found on host".into())
            } else {
                FsError::Docker(format!("spawn docker: {}", e))
            }
        })?;

        if let Some(data) = stdin {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| FsError::Docker("stdin pipe missing".into()))?;
            pipe.write_all(&data).await.map_err(FsError::Io)?;
            drop(pipe);
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| FsError::Docker(format!("wait docker: {}", e)))?;
        Ok(ExecOutput {
            stdout: out.stdout,
            stderr: out.stderr,
            exit_code: out.status.code().unwrap_or(-1),
        })
    }
}

/// `docker` CLI on a remote host, reached through the pooled SSH client.
pub struct SshDockerExecutor {
    pool: Arc<SshPool>,
    asset: SshAssetConfig,
}

impl SshDockerExecutor {
    pub fn new(pool: Arc<SshPool>, asset: SshAssetConfig) -> Self {
        SshDockerExecutor { pool, asset }
    }
}

#[async_trait]
impl DockerExecutor for SshDockerExecutor {
    async fn exec(
        &self,
        container_id: &str,
        argv: &[String],
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, FsError> {
        let mut command = String::from("docker exec ");
        if stdin.is_some() {
            command.push_str("-i ");
        }
        command.push_str(&shell_quote(container_id));
        for arg in argv {
            command.push(' ');
            command.push_str(&shell_quote(arg));
        }
        self.pool.exec(&self.asset, &command, stdin).await
    }
}

/// Single-quote shell quoting; embedded quotes become `'\''`.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/=:@%+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}
