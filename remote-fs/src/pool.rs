//! Pooled SSH clients, keyed by asset id.
//!
//! Entries are dialed lazily with a 30 second handshake timeout, probed with
//! a keepalive on every cache hit, and reaped in the background when idle
//! for more than ten minutes. SFTP clients derive from the pooled session on
//! first request and live as long as it does. Host-key verification is
//! intentionally permissive; trust decisions live upstream.

use std::collections::HashMap;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ssh2::Session;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::docker::ExecOutput;
use crate::FsError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_CUTOFF: Duration = Duration::from_secs(600);
const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Connection settings for one SSH asset. Auth methods are tried in the
/// order: password, inline private key, private-key file; `passphrase`
/// applies to whichever key form is present.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct SshAssetConfig {
    /// Pool cache key; filled in by the resolver, not part of stored config.
    #[serde(default)]
    pub asset_id: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Inline PEM private key.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

struct PoolEntry {
    session: Arc<Session>,
    sftp: Option<Arc<ssh2::Sftp>>,
    #[allow(dead_code)]
    created_at: Instant,
    last_used: Instant,
}

/// Process-wide SSH connection pool. Constructed once and injected; spawns
/// its reaper task on creation.
pub struct SshPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SshPool {
    pub fn new() -> Arc<Self> {
        let pool = Arc::new(SshPool {
            entries: Mutex::new(HashMap::new()),
            reaper: std::sync::Mutex::new(None),
        });
        let weak = Arc::downgrade(&pool);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.reap().await;
            }
        });
        if let Ok(mut guard) = pool.reaper.lock() {
            *guard = Some(handle);
        }
        pool
    }

    /// Returns a live session for the asset, reusing the cached one when its
    /// keepalive probe succeeds and redialing otherwise.
    pub async fn session(&self, cfg: &SshAssetConfig) -> Result<Arc<Session>, FsError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&cfg.asset_id) {
            let session = Arc::clone(&entry.session);
            if probe(&session).await {
                entry.last_used = Instant::now();
                return Ok(session);
            }
            tracing::debug!(asset = %cfg.asset_id, "ssh liveness probe failed, redialing");
            entries.remove(&cfg.asset_id);
        }
        let session = dial(cfg.clone()).await?;
        entries.insert(
            cfg.asset_id.clone(),
            PoolEntry {
                session: Arc::clone(&session),
                sftp: None,
                created_at: Instant::now(),
                last_used: Instant::now(),
            },
        );
        Ok(session)
    }

    /// Returns the SFTP client derived from the pooled session, creating it
    /// on first request.
    pub async fn sftp(&self, cfg: &SshAssetConfig) -> Result<Arc<ssh2::Sftp>, FsError> {
        // Ensure a live session exists (and evict a dead one) first.
        let session = self.session(cfg).await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&cfg.asset_id)
            .ok_or_else(|| FsError::Ssh("session evicted during sftp setup".into()))?;
        if let Some(sftp) = &entry.sftp {
            return Ok(Arc::clone(sftp));
        }
        let sftp = tokio::task::spawn_blocking(move || {
            session.sftp().map_err(|e| FsError::Ssh(e.to_string()))
        })
        .await
        .map_err(|e| FsError::Ssh(format!("sftp task: {}", e)))??;
        let sftp = Arc::new(sftp);
        entry.sftp = Some(Arc::clone(&sftp));
        Ok(sftp)
    }

    /// Runs one command over a session channel, optionally feeding stdin,
    /// capturing stdout, stderr and exit status.
    pub async fn exec(
        &self,
        cfg: &SshAssetConfig,
        command: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput, FsError> {
        let session = self.session(cfg).await?;
        let command = command.to_string();
        tokio::task::spawn_blocking(move || -> Result<ExecOutput, FsError> {
            use std::io::{Read, Write};
            let mut channel = session
                .channel_session()
                .map_err(|e| FsError::Ssh(e.to_string()))?;
            channel
                .exec(&command)
                .map_err(|e| FsError::Ssh(e.to_string()))?;
            if let Some(data) = stdin {
                channel.write_all(&data).map_err(FsError::Io)?;
                channel
                    .send_eof()
                    .map_err(|e| FsError::Ssh(e.to_string()))?;
            }
            let mut stdout = Vec::new();
            channel.read_to_end(&mut stdout).map_err(FsError::Io)?;
            let mut stderr = Vec::new();
            channel
                .stderr()
                .read_to_end(&mut stderr)
                .map_err(FsError::Io)?;
            channel
                .wait_close()
                .map_err(|e| FsError::Ssh(e.to_string()))?;
            let exit_code = channel
                .exit_status()
                .map_err(|e| FsError::Ssh(e.to_string()))?;
            Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
            })
        })
        .await
        .map_err(|e| FsError::Ssh(format!("exec task: {}", e)))?
    }

    async fn reap(&self) {
        let mut entries = self.entries.lock().await;
        let mut dead = Vec::new();
        for (key, entry) in entries.iter() {
            if entry.last_used.elapsed() > IDLE_CUTOFF || !probe(&entry.session).await {
                dead.push(key.clone());
            }
        }
        for key in dead {
            tracing::debug!(asset = %key, "reaping idle ssh connection");
            entries.remove(&key);
        }
    }

    /// Closes all entries and stops the reaper. Safe to call twice.
    pub async fn shutdown(&self) {
        if let Ok(mut guard) = self.reaper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
        self.entries.lock().await.clear();
    }
}

/// Zero-cost liveness probe: a keepalive packet on the transport.
async fn probe(session: &Arc<Session>) -> bool {
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || session.keepalive_send().is_ok())
        .await
        .unwrap_or(false)
}

async fn dial(cfg: SshAssetConfig) -> Result<Arc<Session>, FsError> {
    tokio::task::spawn_blocking(move || -> Result<Arc<Session>, FsError> {
        let addr = format!("{}:{}", cfg.host, cfg.port);
        let sock_addr: std::net::SocketAddr = match addr.parse() {
            Ok(a) => a,
            Err(_) => {
                use std::net::ToSocketAddrs;
                addr.to_socket_addrs()
                    .map_err(|e| FsError::Ssh(format!("resolve {}: {}", addr, e)))?
                    .next()
                    .ok_or_else(|| FsError::Ssh(format!("resolve {}: no address", addr)))?
            }
        };
        let tcp = TcpStream::connect_timeout(&sock_addr, HANDSHAKE_TIMEOUT)
            .map_err(|e| FsError::Ssh(format!("connect {}: {}", addr, e)))?;
        let mut session = Session::new().map_err(|e| FsError::Ssh(e.to_string()))?;
        session.set_timeout(HANDSHAKE_TIMEOUT.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| FsError::Ssh(format!("handshake {}: {}", addr, e)))?;

        authenticate(&session, &cfg)?;
        if !session.authenticated() {
            return Err(FsError::Ssh(format!("authentication failed for {}", addr)));
        }
        // Enable transport keepalives so probes have something to send.
        session.set_keepalive(true, 15);
        session.set_timeout(0);
        Ok(Arc::new(session))
    })
    .await
    .map_err(|e| FsError::Ssh(format!("dial task: {}", e)))?
}

fn authenticate(session: &Session, cfg: &SshAssetConfig) -> Result<(), FsError> {
    let mut last_err: Option<String> = None;
    if let Some(password) = &cfg.password {
        match session.userauth_password(&cfg.username, password) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    if let Some(key) = &cfg.private_key {
        match session.userauth_pubkey_memory(&cfg.username, None, key, cfg.passphrase.as_deref()) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    if let Some(path) = &cfg.private_key_path {
        match session.userauth_pubkey_file(&cfg.username, None, path, cfg.passphrase.as_deref()) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(FsError::Ssh(match last_err {
        Some(e) => format!("all auth methods failed: {}", e),
        None => "no auth method configured".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn dial_unreachable_host_errors() {
        let pool = SshPool::new();
        let cfg = SshAssetConfig {
            asset_id: "a1".into(),
            host: "127.0.0.1".into(),
            port: 1,
            username: "nobody".into(),
            password: Some("pw".into()),
            ..Default::default()
        };
        let err = match pool.session(&cfg).await {
            Err(e) => e,
            Ok(_) => panic!("expected session to fail"),
        };
        assert!(matches!(err, FsError::Ssh(_)));
        pool.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_is_idempotent() {
        let pool = SshPool::new();
        pool.shutdown().await;
        pool.shutdown().await;
    }
}
