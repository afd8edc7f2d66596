//! SQLite-backed persistence: conversations, messages with their chunk log,
//! workspaces and tool configuration, assets, compression snapshots, memory
//! notes, and browser instance records.
//!
//! Chunks are a JSON array column on each message rather than separate rows,
//! so one read rehydrates a message. The store is the sole writer of message
//! and chunk data; streaming writers buffer upstream and append here.

pub mod assets;
pub mod conversations;
pub mod memory;
pub mod messages;
pub mod snapshots;
pub mod types;
pub mod workspaces;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

pub use types::*;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("row".into()),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// SQLite-backed store. One connection behind a mutex; rusqlite serializes
/// writes, callers run on `block_in_place`.
pub struct Store {
    pub(crate) db: Arc<Mutex<rusqlite::Connection>>,
}

impl Store {
    /// Opens or creates the database and tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT,
                workspace_id TEXT,
                asset_id TEXT,
                asset_session_id TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_workspace
                ON conversations(workspace_id, updated_at);

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                parent_id TEXT,
                source_id TEXT,
                status TEXT NOT NULL,
                finish_reason TEXT,
                content TEXT NOT NULL DEFAULT '',
                chunks TEXT NOT NULL DEFAULT '[]',
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                total_tokens INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                runtime TEXT NOT NULL,
                container_id TEXT,
                description TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workspace_tools (
                workspace_id TEXT NOT NULL,
                tool_id TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                safe_mode INTEGER NOT NULL DEFAULT 0,
                options TEXT NOT NULL DEFAULT '{}',
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (workspace_id, tool_id)
            );

            CREATE TABLE IF NOT EXISTS workspace_asset_refs (
                workspace_id TEXT NOT NULL,
                asset_id TEXT NOT NULL,
                PRIMARY KEY (workspace_id, asset_id)
            );

            CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                prev_id TEXT,
                next_id TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS browser_instances (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                container_id TEXT,
                status TEXT NOT NULL DEFAULT 'stopped',
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS compression_snapshots (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                summary TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_snapshots_conversation
                ON compression_snapshots(conversation_id);

            CREATE TABLE IF NOT EXISTS memory_notes (
                workspace_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (workspace_id, key)
            );
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Store {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the connection on the blocking pool.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, StoreError>,
    {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".into()))?;
            f(&conn)
        })
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    pub fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }
}
