//! Memory tools: opaque key-value notes per workspace, persisted in the
//! store.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use choraleia_store::Store;

use super::schema::required_str;
use super::{
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    registry.register(Arc::new(MemorySaveTool {
        store: Arc::clone(&ctx.store),
    }))?;
    registry.register(Arc::new(MemoryGetTool {
        store: Arc::clone(&ctx.store),
    }))?;
    registry.register(Arc::new(MemoryListTool {
        store: Arc::clone(&ctx.store),
    }))?;
    registry.register(Arc::new(MemoryDeleteTool {
        store: Arc::clone(&ctx.store),
    }))?;
    Ok(())
}

fn workspace_id(ctx: &ToolInvocation) -> Result<&str, ToolError> {
    ctx.workspace_id()
        .ok_or_else(|| ToolError::Execution("memory tools need a workspace".into()))
}

pub struct MemorySaveTool {
    store: Arc<Store>,
}

#[async_trait]
impl Tool for MemorySaveTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "memory_save",
                name: "Save memory note",
                description: "Save (or replace) a note under a key, scoped to this workspace.",
                category: ToolCategory::Memory,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "value": {"type": "string"}
                    },
                    "required": ["key", "value"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let workspace = workspace_id(ctx)?;
        let key = required_str(&args, "key")?;
        let value = required_str(&args, "value")?;
        self.store
            .set_memory_note(workspace, key, value)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("saved note '{}'", key))
    }
}

pub struct MemoryGetTool {
    store: Arc<Store>,
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "memory_get",
                name: "Get memory note",
                description: "Read one note by key.",
                category: ToolCategory::Memory,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let workspace = workspace_id(ctx)?;
        let key = required_str(&args, "key")?;
        match self
            .store
            .get_memory_note(workspace, key)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?
        {
            Some(value) => Ok(value),
            None => Ok(format!("no note under '{}'", key)),
        }
    }
}

pub struct MemoryListTool {
    store: Arc<Store>,
}

#[async_trait]
impl Tool for MemoryListTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "memory_list",
                name: "List memory notes",
                description: "List this workspace's note keys with a value preview.",
                category: ToolCategory::Memory,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({"type": "object", "properties": {}}),
            }
        });
        &DEF
    }

    async fn invoke(&self, _args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let workspace = workspace_id(ctx)?;
        let notes = self
            .store
            .list_memory_notes(workspace)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if notes.is_empty() {
            return Ok("no notes".to_string());
        }
        let mut out = String::new();
        for note in notes {
            let preview: String = note.value.chars().take(80).collect();
            out.push_str(&format!("{}: {}\n", note.key, preview));
        }
        Ok(out)
    }
}

pub struct MemoryDeleteTool {
    store: Arc<Store>,
}

#[async_trait]
impl Tool for MemoryDeleteTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "memory_delete",
                name: "Delete memory note",
                description: "Delete one note by key.",
                category: ToolCategory::Memory,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {"key": {"type": "string"}},
                    "required": ["key"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let workspace = workspace_id(ctx)?;
        let key = required_str(&args, "key")?;
        let deleted = self
            .store
            .delete_memory_note(workspace, key)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(if deleted {
            format!("deleted note '{}'", key)
        } else {
            format!("no note under '{}'", key)
        })
    }
}
