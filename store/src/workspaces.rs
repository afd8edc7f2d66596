//! Workspace rows, per-workspace tool configuration, asset references, and
//! browser instance records.

use rusqlite::params;

use crate::{
    new_id, now_ms, BrowserInstance, RuntimeDescriptor, Store, StoreError, Workspace,
    WorkspaceTool,
};

fn row_to_workspace(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workspace> {
    let runtime_json: String = row.get(2)?;
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        runtime: serde_json::from_str(&runtime_json)
            .unwrap_or(RuntimeDescriptor::LocalHost),
        container_id: row.get(3)?,
        description: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

const WORKSPACE_COLS: &str = "id, name, runtime, container_id, description, created_at";

impl Store {
    /// Creates a workspace. A runtime change later means a new workspace, so
    /// the descriptor is written once here and never updated.
    pub async fn create_workspace(
        &self,
        name: &str,
        runtime: RuntimeDescriptor,
        description: Option<&str>,
    ) -> Result<Workspace, StoreError> {
        let workspace = Workspace {
            id: new_id(),
            name: name.to_string(),
            runtime,
            container_id: None,
            description: description.map(str::to_string),
            created_at_ms: now_ms(),
        };
        let runtime_json = serde_json::to_string(&workspace.runtime)
            .map_err(|e| StoreError::Storage(format!("serialize runtime: {}", e)))?;
        let w = workspace.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO workspaces ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    WORKSPACE_COLS
                ),
                params![
                    w.id,
                    w.name,
                    runtime_json,
                    w.container_id,
                    w.description,
                    w.created_at_ms
                ],
            )?;
            Ok(())
        })?;
        Ok(workspace)
    }

    pub async fn get_workspace(&self, id: &str) -> Result<Workspace, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM workspaces WHERE id = ?1", WORKSPACE_COLS),
                params![id],
                row_to_workspace,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("workspace {}", id))
                }
                other => other.into(),
            })
        })
    }

    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM workspaces ORDER BY created_at ASC",
                WORKSPACE_COLS
            ))?;
            let rows = stmt.query_map([], row_to_workspace)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Persists the current container id; runtime-event observers call this
    /// on container created/started/stopped.
    pub async fn set_workspace_container(
        &self,
        id: &str,
        container_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let container_id = container_id.map(str::to_string);
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE workspaces SET container_id = ?1 WHERE id = ?2",
                params![container_id, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("workspace {}", id)));
            }
            Ok(())
        })
    }

    /// Replaces the workspace's tool configuration rows.
    pub async fn set_workspace_tools(
        &self,
        workspace_id: &str,
        tools: &[WorkspaceTool],
    ) -> Result<(), StoreError> {
        let workspace_id = workspace_id.to_string();
        let tools = tools.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM workspace_tools WHERE workspace_id = ?1",
                params![workspace_id],
            )?;
            for tool in &tools {
                let options = serde_json::to_string(&tool.options)
                    .map_err(|e| StoreError::Storage(format!("serialize options: {}", e)))?;
                conn.execute(
                    "INSERT INTO workspace_tools \
                     (workspace_id, tool_id, enabled, safe_mode, options, position) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        workspace_id,
                        tool.tool_id,
                        tool.enabled as i64,
                        tool.safe_mode as i64,
                        options,
                        tool.position
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Tool configuration in position order.
    pub async fn list_workspace_tools(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<WorkspaceTool>, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT tool_id, enabled, safe_mode, options, position FROM workspace_tools \
                 WHERE workspace_id = ?1 ORDER BY position ASC",
            )?;
            let rows = stmt.query_map(params![workspace_id], |row| {
                let enabled: i64 = row.get(1)?;
                let safe_mode: i64 = row.get(2)?;
                let options: String = row.get(3)?;
                Ok(WorkspaceTool {
                    tool_id: row.get(0)?,
                    enabled: enabled != 0,
                    safe_mode: safe_mode != 0,
                    options: serde_json::from_str(&options).unwrap_or_default(),
                    position: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub async fn add_workspace_asset_ref(
        &self,
        workspace_id: &str,
        asset_id: &str,
    ) -> Result<(), StoreError> {
        let workspace_id = workspace_id.to_string();
        let asset_id = asset_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO workspace_asset_refs (workspace_id, asset_id) VALUES (?1, ?2)",
                params![workspace_id, asset_id],
            )?;
            Ok(())
        })
    }

    pub async fn list_workspace_asset_refs(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT asset_id FROM workspace_asset_refs WHERE workspace_id = ?1 ORDER BY asset_id",
            )?;
            let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub async fn upsert_browser_instance(
        &self,
        instance: &BrowserInstance,
    ) -> Result<(), StoreError> {
        let i = instance.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO browser_instances (id, workspace_id, container_id, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET container_id = ?3, status = ?4",
                params![i.id, i.workspace_id, i.container_id, i.status, i.created_at_ms],
            )?;
            Ok(())
        })
    }

    pub async fn list_browser_instances(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<BrowserInstance>, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, workspace_id, container_id, status, created_at \
                 FROM browser_instances WHERE workspace_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![workspace_id], |row| {
                Ok(BrowserInstance {
                    id: row.get(0)?,
                    workspace_id: row.get(1)?,
                    container_id: row.get(2)?,
                    status: row.get(3)?,
                    created_at_ms: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}
