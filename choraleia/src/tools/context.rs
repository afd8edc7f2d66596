//! Construction-time and per-call context for tools.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use choraleia_store::{Store, Workspace};
use remote_fs::FsRegistry;

use crate::runtime::WorkspaceRuntimeManager;

use super::ToolError;

/// Browser-automation collaborator. The real implementation lives outside
/// the core; tests and headless deployments use [`NullBrowserService`].
#[async_trait]
pub trait BrowserService: Send + Sync {
    /// Starts (or reuses) a browser instance for a workspace; returns its id.
    async fn start(&self, workspace_id: &str) -> Result<String, ToolError>;
    async fn navigate(&self, instance_id: &str, url: &str) -> Result<(), ToolError>;
    /// Performs one interaction (click/type/scroll) described as JSON.
    async fn interact(&self, instance_id: &str, action: Value) -> Result<String, ToolError>;
    /// Extracts page content matching a query (selector or description).
    async fn extract(&self, instance_id: &str, query: &str) -> Result<String, ToolError>;
    async fn stop(&self, instance_id: &str) -> Result<(), ToolError>;
}

/// Browser collaborator stand-in; every call reports the missing service.
pub struct NullBrowserService;

#[async_trait]
impl BrowserService for NullBrowserService {
    async fn start(&self, _workspace_id: &str) -> Result<String, ToolError> {
        Err(ToolError::Execution("browser service not configured".into()))
    }
    async fn navigate(&self, _instance_id: &str, _url: &str) -> Result<(), ToolError> {
        Err(ToolError::Execution("browser service not configured".into()))
    }
    async fn interact(&self, _instance_id: &str, _action: Value) -> Result<String, ToolError> {
        Err(ToolError::Execution("browser service not configured".into()))
    }
    async fn extract(&self, _instance_id: &str, _query: &str) -> Result<String, ToolError> {
        Err(ToolError::Execution("browser service not configured".into()))
    }
    async fn stop(&self, _instance_id: &str) -> Result<(), ToolError> {
        Err(ToolError::Execution("browser service not configured".into()))
    }
}

/// Handles tools close over at registration time.
#[derive(Clone)]
pub struct ToolContext {
    pub runtime: Arc<WorkspaceRuntimeManager>,
    pub fs_registry: FsRegistry,
    pub store: Arc<Store>,
    pub browser: Arc<dyn BrowserService>,
}

/// Per-call context handed to `invoke`.
#[derive(Clone)]
pub struct ToolInvocation {
    /// The active workspace, when the conversation has one.
    pub workspace: Option<Workspace>,
    /// Per-workspace tool options from configuration.
    pub options: Value,
    pub cancel: CancellationToken,
}

impl ToolInvocation {
    pub fn for_workspace(workspace: Option<Workspace>) -> Self {
        ToolInvocation {
            workspace,
            options: Value::Null,
            cancel: CancellationToken::new(),
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace.as_ref().map(|w| w.id.as_str())
    }
}
