//! Core error kinds, aligned with the HTTP layer's taxonomy: user input and
//! not-found map to 4xx before a stream opens; provider and tool errors are
//! contained in-stream once headers are out.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    UserInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("provider: {0}")]
    Provider(#[from] crate::provider::ProviderError),
    #[error("tool: {0}")]
    Tool(#[from] crate::tools::ToolError),
    #[error("store: {0}")]
    Store(#[from] choraleia_store::StoreError),
    #[error("filesystem: {0}")]
    Fs(#[from] remote_fs::FsError),
    #[error("cancelled")]
    Cancelled,
    #[error("fatal: {0}")]
    Fatal(String),
}
