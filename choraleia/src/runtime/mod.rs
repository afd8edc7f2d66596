//! Workspace runtime resolution and command execution.
//!
//! Decides where a tool's side-effects land (host process, `docker exec`
//! against the local daemon, or `docker exec` over SSH), executes commands
//! there with bounded output, and fans container lifecycle events out to
//! observers without letting a slow observer stall the manager.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use choraleia_store::{RuntimeDescriptor, Store, Workspace};
use remote_fs::{
    AssetEndpoint, AssetResolver, ContainerFs, DockerExecutor, LocalDockerExecutor, LocalFs,
    RemoteFs, SshDockerExecutor, SshPool,
};

use crate::tools::{ToolError, ToolRuntimeEnv};

/// Keeps tool-result chunks within context budget.
const MAX_OUTPUT_BYTES: usize = 30_000;
const TRUNCATION_SENTINEL: &str = "\n... [output truncated]";
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Where one tool call executes.
#[derive(Clone)]
pub enum ExecutionSite {
    Host,
    Container {
        executor: Arc<dyn DockerExecutor>,
        container_id: String,
    },
}

/// Captured command outcome; `truncated` marks a bounded stdout.
#[derive(Clone, Debug)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub truncated: bool,
}

impl ExecResult {
    /// One text block for a tool-result chunk.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("stderr: ");
            out.push_str(&self.stderr);
        }
        if self.exit_code != 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("exit code: {}", self.exit_code));
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        out
    }
}

/// Container lifecycle events observed by the store writer and the UI feed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    ContainerCreated {
        workspace_id: String,
        container_id: String,
    },
    ContainerStarted {
        workspace_id: String,
        container_id: String,
    },
    ContainerStopped {
        workspace_id: String,
        container_id: String,
    },
}

/// Snapshot of a workspace runtime, refreshed by the periodic monitor.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RuntimeStatus {
    pub container_id: Option<String>,
    pub running: bool,
    pub checked_at_ms: i64,
}

pub struct WorkspaceRuntimeManager {
    pool: Arc<SshPool>,
    resolver: Arc<dyn AssetResolver>,
    store: Arc<Store>,
    observers: Mutex<Vec<mpsc::Sender<RuntimeEvent>>>,
    status: DashMap<String, RuntimeStatus>,
    monitor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkspaceRuntimeManager {
    pub fn new(pool: Arc<SshPool>, resolver: Arc<dyn AssetResolver>, store: Arc<Store>) -> Arc<Self> {
        Arc::new(WorkspaceRuntimeManager {
            pool,
            resolver,
            store,
            observers: Mutex::new(Vec::new()),
            status: DashMap::new(),
            monitor: Mutex::new(None),
        })
    }

    /// Resolves the execution site for a tool in a workspace.
    pub async fn resolve_site(
        &self,
        workspace: Option<&Workspace>,
        env: ToolRuntimeEnv,
    ) -> Result<ExecutionSite, ToolError> {
        let Some(workspace) = workspace else {
            return Ok(ExecutionSite::Host);
        };
        if env == ToolRuntimeEnv::Local {
            return Ok(ExecutionSite::Host);
        }
        match &workspace.runtime {
            RuntimeDescriptor::LocalHost => Ok(ExecutionSite::Host),
            RuntimeDescriptor::ContainerLocal => {
                let container_id = workspace.container_id.clone().ok_or_else(|| {
                    ToolError::Execution(format!(
                        "workspace {} has no running container",
                        workspace.id
                    ))
                })?;
                Ok(ExecutionSite::Container {
                    executor: Arc::new(LocalDockerExecutor::new()),
                    container_id,
                })
            }
            RuntimeDescriptor::ContainerRemote { asset_id } => {
                let container_id = workspace.container_id.clone().ok_or_else(|| {
                    ToolError::Execution(format!(
                        "workspace {} has no running container",
                        workspace.id
                    ))
                })?;
                let endpoint = self
                    .resolver
                    .resolve(asset_id)
                    .await
                    .map_err(|e| ToolError::Execution(e.to_string()))?;
                let cfg = match endpoint {
                    AssetEndpoint::Ssh(cfg) | AssetEndpoint::DockerHostSsh(cfg) => cfg,
                    AssetEndpoint::DockerHostLocal => {
                        return Ok(ExecutionSite::Container {
                            executor: Arc::new(LocalDockerExecutor::new()),
                            container_id,
                        })
                    }
                };
                Ok(ExecutionSite::Container {
                    executor: Arc::new(SshDockerExecutor::new(Arc::clone(&self.pool), cfg)),
                    container_id,
                })
            }
        }
    }

    /// Filesystem matching the execution site.
    pub async fn fs_for(
        &self,
        workspace: Option<&Workspace>,
        env: ToolRuntimeEnv,
    ) -> Result<Arc<dyn RemoteFs>, ToolError> {
        match self.resolve_site(workspace, env).await? {
            ExecutionSite::Host => Ok(Arc::new(LocalFs::new())),
            ExecutionSite::Container {
                executor,
                container_id,
            } => Ok(Arc::new(ContainerFs::new(executor, container_id))),
        }
    }

    /// Runs a command with its argv preserved (no shell).
    pub async fn exec_command(
        &self,
        site: &ExecutionSite,
        argv: &[String],
        cwd: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ToolError> {
        if argv.is_empty() {
            return Err(ToolError::InvalidArguments("empty argv".into()));
        }
        match site {
            ExecutionSite::Host => host_exec(argv, cwd, timeout, cancel).await,
            ExecutionSite::Container {
                executor,
                container_id,
            } => {
                let mut full = Vec::new();
                if let Some(dir) = cwd {
                    // docker exec has no -w passthrough here; wrap with sh.
                    full = vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        format!(
                            "cd {} && exec {}",
                            remote_fs::docker::shell_quote(dir),
                            argv.iter()
                                .map(|a| remote_fs::docker::shell_quote(a))
                                .collect::<Vec<_>>()
                                .join(" ")
                        ),
                    ];
                }
                let argv = if full.is_empty() { argv } else { &full[..] };
                container_exec(executor.as_ref(), container_id, argv, timeout, cancel).await
            }
        }
    }

    /// Runs a script under a shell via heredoc (`/bin/sh` by default).
    pub async fn exec_script(
        &self,
        site: &ExecutionSite,
        script: &str,
        shell: Option<&str>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, ToolError> {
        let shell = shell.unwrap_or("/bin/sh");
        let wrapped = format!("{} <<'CHORALEIA_EOF'\n{}\nCHORALEIA_EOF", shell, script);
        let argv = vec!["/bin/sh".to_string(), "-c".to_string(), wrapped];
        match site {
            ExecutionSite::Host => host_exec(&argv, None, timeout, cancel).await,
            ExecutionSite::Container {
                executor,
                container_id,
            } => container_exec(executor.as_ref(), container_id, &argv, timeout, cancel).await,
        }
    }

    /// Registers an observer. Each observer drains its own channel on its
    /// own task; a full channel drops events rather than blocking emit.
    pub fn subscribe(&self) -> mpsc::Receiver<RuntimeEvent> {
        let (tx, rx) = mpsc::channel(64);
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        }
        rx
    }

    /// Emits a container event: persists the workspace's container id, then
    /// notifies observers.
    pub async fn notify(&self, event: RuntimeEvent) {
        let (workspace_id, container_id, present) = match &event {
            RuntimeEvent::ContainerCreated {
                workspace_id,
                container_id,
            }
            | RuntimeEvent::ContainerStarted {
                workspace_id,
                container_id,
            } => (workspace_id.clone(), container_id.clone(), true),
            RuntimeEvent::ContainerStopped {
                workspace_id,
                container_id,
            } => (workspace_id.clone(), container_id.clone(), false),
        };
        let stored = if present {
            Some(container_id.as_str())
        } else {
            None
        };
        if let Err(e) = self.store.set_workspace_container(&workspace_id, stored).await {
            tracing::warn!(workspace = %workspace_id, "persist container id: {}", e);
        }
        self.status.insert(
            workspace_id.clone(),
            RuntimeStatus {
                container_id: present.then(|| container_id.clone()),
                running: present,
                checked_at_ms: now_ms(),
            },
        );
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("runtime observer queue full, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }

    /// Latest monitor view for a workspace.
    pub fn status(&self, workspace_id: &str) -> Option<RuntimeStatus> {
        self.status.get(workspace_id).map(|s| s.clone())
    }

    /// Starts the periodic container-status monitor.
    pub fn start_monitor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(MONITOR_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.refresh_statuses().await;
            }
        });
        if let Ok(mut guard) = self.monitor.lock() {
            if let Some(old) = guard.replace(handle) {
                old.abort();
            }
        }
    }

    pub fn stop_monitor(&self) {
        if let Ok(mut guard) = self.monitor.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    async fn refresh_statuses(&self) {
        let workspaces = match self.store.list_workspaces().await {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!("monitor: list workspaces: {}", e);
                return;
            }
        };
        for workspace in workspaces {
            if matches!(workspace.runtime, RuntimeDescriptor::LocalHost) {
                continue;
            }
            let running = match &workspace.container_id {
                None => false,
                Some(container_id) => self
                    .container_running(&workspace, container_id)
                    .await
                    .unwrap_or(false),
            };
            self.status.insert(
                workspace.id.clone(),
                RuntimeStatus {
                    container_id: workspace.container_id.clone(),
                    running,
                    checked_at_ms: now_ms(),
                },
            );
        }
    }

    async fn container_running(
        &self,
        workspace: &Workspace,
        container_id: &str,
    ) -> Result<bool, ToolError> {
        let check = ["test", "-d", "/proc/1"].map(String::from).to_vec();
        let site = self
            .resolve_site(Some(workspace), ToolRuntimeEnv::Workspace)
            .await?;
        let ExecutionSite::Container { executor, .. } = site else {
            return Ok(false);
        };
        match executor.exec(container_id, &check, None).await {
            Ok(out) => Ok(out.exit_code == 0),
            Err(_) => Ok(false),
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Truncates to the output budget, appending the sentinel.
fn bound_output(raw: Vec<u8>) -> (String, bool) {
    let mut text = String::from_utf8_lossy(&raw).to_string();
    if text.len() > MAX_OUTPUT_BYTES {
        let mut cut = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str(TRUNCATION_SENTINEL);
        (text, true)
    } else {
        (text, false)
    }
}

async fn host_exec(
    argv: &[String],
    cwd: Option<&str>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExecResult, ToolError> {
    use std::process::Stdio;
    use tokio::io::AsyncReadExt;

    let mut cmd = tokio::process::Command::new(&argv[0]);
    cmd.args(&argv[1..]);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::Execution(format!("spawn {}: {}", argv[0], e)))?;
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let reader = tokio::spawn(async move {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stdout).await;
        }
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut stderr).await;
        }
        (stdout, stderr)
    });

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| ToolError::Execution(format!("wait: {}", e)))?
        }
        _ = cancel.cancelled() => {
            term_then_kill(&mut child).await;
            return Err(ToolError::Cancelled);
        }
        _ = tokio::time::sleep(timeout) => {
            term_then_kill(&mut child).await;
            return Err(ToolError::Timeout);
        }
    };
    let (stdout, stderr) = reader
        .await
        .map_err(|e| ToolError::Execution(format!("reader: {}", e)))?;
    let (stdout, truncated) = bound_output(stdout);
    let (stderr, _) = bound_output(stderr);
    Ok(ExecResult {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
        truncated,
    })
}

/// SIGTERM first; SIGKILL when the process is still alive after the grace
/// window.
async fn term_then_kill(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

async fn container_exec(
    executor: &dyn DockerExecutor,
    container_id: &str,
    argv: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExecResult, ToolError> {
    let fut = executor.exec(container_id, argv, None);
    let out = tokio::select! {
        out = fut => out.map_err(|e| ToolError::Execution(e.to_string()))?,
        _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        _ = tokio::time::sleep(timeout) => return Err(ToolError::Timeout),
    };
    let (stdout, truncated) = bound_output(out.stdout);
    let (stderr, _) = bound_output(out.stderr);
    Ok(ExecResult {
        stdout,
        stderr,
        exit_code: out.exit_code,
        truncated,
    })
}

/// Resolves asset endpoints from asset rows in the store.
pub struct StoreAssetResolver {
    store: Arc<Store>,
}

impl StoreAssetResolver {
    pub fn new(store: Arc<Store>) -> Self {
        StoreAssetResolver { store }
    }
}

#[async_trait::async_trait]
impl AssetResolver for StoreAssetResolver {
    async fn resolve(&self, asset_id: &str) -> Result<AssetEndpoint, remote_fs::FsError> {
        let asset = self
            .store
            .get_asset(asset_id)
            .await
            .map_err(|e| remote_fs::FsError::Other(e.to_string()))?;
        let ssh_config = |config: &Value| -> Result<remote_fs::SshAssetConfig, remote_fs::FsError> {
            let mut cfg: remote_fs::SshAssetConfig = serde_json::from_value(config.clone())
                .map_err(|e| {
                    remote_fs::FsError::Other(format!("asset {} ssh config: {}", asset_id, e))
                })?;
            cfg.asset_id = asset_id.to_string();
            Ok(cfg)
        };
        match asset.kind {
            choraleia_store::AssetKind::SshHost => Ok(AssetEndpoint::Ssh(ssh_config(&asset.config)?)),
            choraleia_store::AssetKind::DockerHost => {
                let over_ssh = asset.config.get("host").and_then(Value::as_str).is_some();
                if over_ssh {
                    Ok(AssetEndpoint::DockerHostSsh(ssh_config(&asset.config)?))
                } else {
                    Ok(AssetEndpoint::DockerHostLocal)
                }
            }
            other => Err(remote_fs::FsError::InvalidEndpoint(format!(
                "asset {} ({:?}) is not a connectable endpoint",
                asset_id, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_output_appends_sentinel() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 100];
        let (text, truncated) = bound_output(big);
        assert!(truncated);
        assert!(text.ends_with(TRUNCATION_SENTINEL));
        let small = b"ok".to_vec();
        let (text, truncated) = bound_output(small);
        assert_eq!(text, "ok");
        assert!(!truncated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_exec_captures_output_and_exit() {
        let cancel = CancellationToken::new();
        let out = host_exec(
            &["/bin/sh".into(), "-c".into(), "echo out; echo err >&2; exit 3".into()],
            None,
            Duration::from_secs(10),
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_exec_cancel_stops_process_within_grace() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        let started = std::time::Instant::now();
        let err = host_exec(
            &["sleep".into(), "60".into()],
            None,
            Duration::from_secs(120),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn host_exec_timeout() {
        let cancel = CancellationToken::new();
        let err = host_exec(
            &["sleep".into(), "60".into()],
            None,
            Duration::from_millis(200),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolError::Timeout));
    }

    #[test]
    fn exec_result_render_shapes() {
        let r = ExecResult {
            stdout: "hello".into(),
            stderr: String::new(),
            exit_code: 0,
            truncated: false,
        };
        assert_eq!(r.render(), "hello");
        let r = ExecResult {
            stdout: String::new(),
            stderr: "boom".into(),
            exit_code: 1,
            truncated: false,
        };
        assert_eq!(r.render(), "stderr: boom\nexit code: 1");
    }
}
