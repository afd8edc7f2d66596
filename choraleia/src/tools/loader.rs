//! Per-workspace tool binding: the ordered, enabled tool list with schemas
//! and configuration, filtered by safe-mode policy.

use std::sync::Arc;

use serde_json::Value;

use choraleia_store::{Store, StoreError, WorkspaceTool};

use crate::provider::ToolSchema;

use super::{Tool, ToolRegistry};

/// One tool bound to a workspace: the invocable plus its configuration row.
#[derive(Clone)]
pub struct BoundTool {
    pub tool: Arc<dyn Tool>,
    pub options: Value,
}

impl BoundTool {
    pub fn id(&self) -> &str {
        self.tool.definition().id
    }

    pub fn schema(&self) -> ToolSchema {
        let def = self.tool.definition();
        ToolSchema {
            name: def.id.to_string(),
            description: def.description.to_string(),
            parameters: def.parameters.clone(),
        }
    }
}

/// Materializes a workspace's tool list.
///
/// With configuration rows, the rows decide membership and order; unknown
/// tool ids are skipped with a warning. Without rows, every registered tool
/// is available in registry (id) order. Safe mode strips tools flagged
/// dangerous and rows carrying the safe-mode restriction.
pub async fn load_workspace_tools(
    registry: &Arc<ToolRegistry>,
    store: &Store,
    workspace_id: Option<&str>,
    safe_mode: bool,
) -> Result<Vec<BoundTool>, StoreError> {
    let rows: Vec<WorkspaceTool> = match workspace_id {
        Some(id) => store.list_workspace_tools(id).await?,
        None => Vec::new(),
    };

    let mut bound = Vec::new();
    if rows.is_empty() {
        for tool in registry.all() {
            if safe_mode && tool.definition().dangerous {
                continue;
            }
            bound.push(BoundTool {
                tool: Arc::clone(tool),
                options: Value::Null,
            });
        }
        return Ok(bound);
    }

    for row in rows {
        if !row.enabled {
            continue;
        }
        if safe_mode && row.safe_mode {
            continue;
        }
        let Some(tool) = registry.get(&row.tool_id) else {
            tracing::warn!(tool = %row.tool_id, "workspace references unknown tool, skipping");
            continue;
        };
        if safe_mode && tool.definition().dangerous {
            continue;
        }
        bound.push(BoundTool {
            tool,
            options: row.options,
        });
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{
        ToolCategory, ToolDefinition, ToolError, ToolInvocation, ToolRuntimeEnv, ToolScope,
    };
    use async_trait::async_trait;

    struct Dummy {
        def: ToolDefinition,
    }

    #[async_trait]
    impl Tool for Dummy {
        fn definition(&self) -> &ToolDefinition {
            &self.def
        }
        async fn invoke(
            &self,
            _args: Value,
            _ctx: &ToolInvocation,
        ) -> Result<String, ToolError> {
            Ok("ok".into())
        }
    }

    fn dummy(id: &'static str, dangerous: bool) -> Arc<dyn Tool> {
        Arc::new(Dummy {
            def: ToolDefinition {
                id,
                name: id,
                description: "",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: serde_json::json!({"type": "object"}),
            },
        })
    }

    fn test_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(dummy("fs_read", false)).unwrap();
        registry.register(dummy("exec_command", true)).unwrap();
        Arc::new(registry)
    }

    async fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        (dir, store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_rows_yields_all_tools_and_safe_mode_filters() {
        let registry = test_registry();
        let (_dir, store) = test_store().await;

        let all = load_workspace_tools(&registry, &store, None, false)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let safe = load_workspace_tools(&registry, &store, None, true)
            .await
            .unwrap();
        let ids: Vec<_> = safe.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, ["fs_read"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rows_decide_membership_order_and_options() {
        let registry = test_registry();
        let (_dir, store) = test_store().await;
        let workspace = store
            .create_workspace("w", choraleia_store::RuntimeDescriptor::LocalHost, None)
            .await
            .unwrap();
        store
            .set_workspace_tools(
                &workspace.id,
                &[
                    WorkspaceTool {
                        tool_id: "exec_command".into(),
                        enabled: true,
                        safe_mode: false,
                        options: serde_json::json!({"shell": "/bin/bash"}),
                        position: 0,
                    },
                    WorkspaceTool {
                        tool_id: "fs_read".into(),
                        enabled: false,
                        safe_mode: false,
                        options: serde_json::json!({}),
                        position: 1,
                    },
                    WorkspaceTool {
                        tool_id: "ghost_tool".into(),
                        enabled: true,
                        safe_mode: false,
                        options: serde_json::json!({}),
                        position: 2,
                    },
                ],
            )
            .await
            .unwrap();

        let bound = load_workspace_tools(&registry, &store, Some(&workspace.id), false)
            .await
            .unwrap();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].id(), "exec_command");
        assert_eq!(bound[0].options["shell"], "/bin/bash");

        // exec_command is dangerous, so safe mode empties the list.
        let safe = load_workspace_tools(&registry, &store, Some(&workspace.id), true)
            .await
            .unwrap();
        assert!(safe.is_empty());
    }
}
