//! Tool registry and the built-in tool set.
//!
//! Each tool is an explicit record: definition (id, category, scope, danger
//! flag, argument schema) plus an `invoke` that takes arguments JSON and a
//! per-call context. Argument validation is a data-driven schema walk, no
//! reflection. The registry is built at process start and frozen behind an
//! `Arc`; duplicate registration is a fatal startup error.

pub mod browser_tools;
pub mod context;
pub mod exec_tools;
pub mod fs_tools;
pub mod index_tools;
pub mod loader;
pub mod memory_tools;
pub mod schema;
pub mod transfer_tools;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use context::{BrowserService, NullBrowserService, ToolContext, ToolInvocation};
pub use loader::{load_workspace_tools, BoundTool};
pub use schema::validate_args;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Execution(String),
    #[error("tool timed out")]
    Timeout,
    #[error("tool cancelled")]
    Cancelled,
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("duplicate tool id: {0}")]
    Duplicate(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Workspace,
    Asset,
    Database,
    Transfer,
    Browser,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolScope {
    Global,
    Workspace,
}

/// Where the tool's side-effects land, resolved against the workspace
/// runtime by the runtime manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRuntimeEnv {
    /// Inside the workspace's runtime (container when one is configured).
    Workspace,
    /// Always the host process.
    Local,
}

/// Static description of one tool.
#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: ToolCategory,
    pub scope: ToolScope,
    /// Requires user acknowledgment upstream; filtered in safe mode.
    pub dangerous: bool,
    pub runtime_env: ToolRuntimeEnv,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    /// Runs the tool. Arguments have already passed the schema walk.
    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError>;
}

/// Registry of all tools, keyed by id. Read-only after startup.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool; a second tool with the same id is fatal.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let id = tool.definition().id;
        if self.tools.contains_key(id) {
            return Err(ToolError::Duplicate(id.to_string()));
        }
        self.tools.insert(id, tool);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registers the complete built-in tool set against one context.
pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    fs_tools::register(registry, ctx)?;
    exec_tools::register(registry, ctx)?;
    index_tools::register(registry, ctx)?;
    transfer_tools::register(registry, ctx)?;
    browser_tools::register(registry, ctx)?;
    memory_tools::register(registry, ctx)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(ToolDefinition);

    #[async_trait]
    impl Tool for Dummy {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }
        async fn invoke(&self, _args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
            Ok("ok".into())
        }
    }

    fn dummy(id: &'static str) -> Arc<dyn Tool> {
        Arc::new(Dummy(ToolDefinition {
            id,
            name: id,
            description: "",
            category: ToolCategory::Workspace,
            scope: ToolScope::Global,
            dangerous: false,
            runtime_env: ToolRuntimeEnv::Local,
            parameters: serde_json::json!({"type": "object"}),
        }))
    }

    #[test]
    fn duplicate_registration_is_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("a")).unwrap();
        let err = registry.register(dummy("a")).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate(_)));
    }

    #[test]
    fn registry_iterates_in_id_order() {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("zeta")).unwrap();
        registry.register(dummy("alpha")).unwrap();
        let ids: Vec<_> = registry.all().map(|t| t.definition().id).collect();
        assert_eq!(ids, ["alpha", "zeta"]);
    }
}
