//! Workspace file tools and their asset-side equivalents.
//!
//! Workspace tools resolve their filesystem through the runtime manager, so
//! the same `fs_read` lands on the host or inside the workspace container
//! depending on the workspace runtime. Asset tools name an explicit asset
//! and go through the endpoint registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use remote_fs::{Endpoint, FsRegistry, RemoteFs};

use crate::runtime::WorkspaceRuntimeManager;

use super::schema::{optional_bool, required_str};
use super::{
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    let runtime = Arc::clone(&ctx.runtime);
    registry.register(Arc::new(FsListTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsReadTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsWriteTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsPatchTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsStatTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsMkdirTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsRemoveTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsRenameTool { runtime: runtime.clone() }))?;
    registry.register(Arc::new(FsCopyTool { runtime }))?;
    registry.register(Arc::new(AssetFsListTool {
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    registry.register(Arc::new(AssetFsReadTool {
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    registry.register(Arc::new(AssetFsWriteTool {
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    Ok(())
}

fn path_schema(extra: Value) -> Value {
    let mut schema = json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": "Absolute POSIX path."}
        },
        "required": ["path"]
    });
    if let (Some(obj), Some(extra)) = (
        schema["properties"].as_object_mut(),
        extra.as_object(),
    ) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    schema
}

fn render_entries(entries: &[remote_fs::FsEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        out.push_str(&format!(
            "{:<11} {:>10}  {}{}\n",
            entry.mode, entry.size, entry.name, suffix
        ));
    }
    if out.is_empty() {
        out.push_str("(empty directory)\n");
    }
    out
}

/// Reads content through the chunked reader and renders `cat -n` style with
/// offset/limit, long lines truncated.
async fn render_file(
    fs: &dyn RemoteFs,
    path: &str,
    offset: usize,
    limit: usize,
) -> Result<String, ToolError> {
    let mut reader = fs
        .open_read(path)
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    let bytes = reader
        .read_to_end()
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();
    let start = offset.min(total);
    let end = (start + limit).min(total);
    let mut out = String::new();
    for (i, line) in lines[start..end].iter().enumerate() {
        let line_number = start + i + 1;
        if line.len() > MAX_LINE_LENGTH {
            let mut cut = MAX_LINE_LENGTH;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            out.push_str(&format!("  {}\t{}...\n", line_number, &line[..cut]));
        } else {
            out.push_str(&format!("  {}\t{}\n", line_number, line));
        }
    }
    Ok(out)
}

async fn write_all(
    fs: &dyn RemoteFs,
    path: &str,
    content: &[u8],
    overwrite: bool,
) -> Result<(), ToolError> {
    let mut writer = fs
        .open_write(path, overwrite)
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    writer
        .write_chunk(content)
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))?;
    writer
        .close()
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))
}

macro_rules! workspace_fs {
    ($self:ident, $ctx:ident) => {
        $self
            .runtime
            .fs_for($ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?
    };
}

pub struct FsListTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsListTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_list",
                name: "List directory",
                description: "List a directory: entries with mode, size and name, directories first.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({
                    "include_hidden": {"type": "boolean", "description": "Include dot entries.", "default": false}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let include_hidden = optional_bool(&args, "include_hidden").unwrap_or(false);
        let fs = workspace_fs!(self, ctx);
        let entries = fs
            .list_dir(path, include_hidden)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(render_entries(&entries))
    }
}

pub struct FsReadTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsReadTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_read",
                name: "Read file",
                description: "Read a text file. Optional offset (0-based line) and limit (default 2000). \
                              Output is cat -n style with line numbers.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({
                    "offset": {"type": "integer", "minimum": 0},
                    "limit": {"type": "integer", "minimum": 1, "default": 2000}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);
        let fs = workspace_fs!(self, ctx);
        render_file(fs.as_ref(), path, offset, limit).await
    }
}

pub struct FsWriteTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsWriteTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_write",
                name: "Write file",
                description: "Write full file content, creating parent directories. \
                              Set overwrite=false to fail instead of replacing an existing file.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({
                    "content": {"type": "string"},
                    "overwrite": {"type": "boolean", "default": true}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let overwrite = optional_bool(&args, "overwrite").unwrap_or(true);
        let fs = workspace_fs!(self, ctx);
        write_all(fs.as_ref(), path, content.as_bytes(), overwrite).await?;
        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }
}

pub struct FsPatchTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsPatchTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_patch",
                name: "Patch file",
                description: "Replace an exact text fragment in a file. old_text must match exactly once \
                              unless replace_all is set.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({
                    "old_text": {"type": "string"},
                    "new_text": {"type": "string"},
                    "replace_all": {"type": "boolean", "default": false}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let old_text = required_str(&args, "old_text")?;
        let new_text = required_str(&args, "new_text")?;
        let replace_all = optional_bool(&args, "replace_all").unwrap_or(false);
        if old_text.is_empty() {
            return Err(ToolError::InvalidArguments("old_text is empty".into()));
        }
        let fs = workspace_fs!(self, ctx);
        let mut reader = fs
            .open_read(path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let bytes = reader
            .read_to_end()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let content = String::from_utf8_lossy(&bytes).to_string();

        let occurrences = content.matches(old_text).count();
        if occurrences == 0 {
            return Err(ToolError::Execution(format!(
                "old_text not found in {}",
                path
            )));
        }
        if occurrences > 1 && !replace_all {
            return Err(ToolError::Execution(format!(
                "old_text matches {} times in {}; pass replace_all or a longer fragment",
                occurrences, path
            )));
        }
        let patched = if replace_all {
            content.replace(old_text, new_text)
        } else {
            content.replacen(old_text, new_text, 1)
        };
        write_all(fs.as_ref(), path, patched.as_bytes(), true).await?;
        Ok(format!(
            "patched {} ({} replacement{})",
            path,
            occurrences,
            if occurrences == 1 { "" } else { "s" }
        ))
    }
}

pub struct FsStatTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsStatTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_stat",
                name: "Stat path",
                description: "Stat a file or directory.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({})),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let fs = workspace_fs!(self, ctx);
        let entry = fs
            .stat(path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!(
            "{} {} size={} mode={} modified_ms={}",
            if entry.is_dir { "dir" } else { "file" },
            entry.path,
            entry.size,
            entry.mode,
            entry.modified_ms
        ))
    }
}

pub struct FsMkdirTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsMkdirTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_mkdir",
                name: "Make directory",
                description: "Create a directory and any missing parents.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({})),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let fs = workspace_fs!(self, ctx);
        fs.mkdir_all(path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("created {}", path))
    }
}

pub struct FsRemoveTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsRemoveTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_remove",
                name: "Remove path",
                description: "Remove a file or directory tree.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: path_schema(json!({})),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let fs = workspace_fs!(self, ctx);
        fs.remove(path)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("removed {}", path))
    }
}

pub struct FsRenameTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsRenameTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_rename",
                name: "Rename path",
                description: "Rename or move a file or directory.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "from": {"type": "string"},
                        "to": {"type": "string"}
                    },
                    "required": ["from", "to"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let from = required_str(&args, "from")?;
        let to = required_str(&args, "to")?;
        let fs = workspace_fs!(self, ctx);
        fs.rename(from, to)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("renamed {} -> {}", from, to))
    }
}

pub struct FsCopyTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for FsCopyTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "fs_copy",
                name: "Copy file",
                description: "Copy a file within the workspace filesystem.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "from": {"type": "string"},
                        "to": {"type": "string"},
                        "overwrite": {"type": "boolean", "default": true}
                    },
                    "required": ["from", "to"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let from = required_str(&args, "from")?;
        let to = required_str(&args, "to")?;
        let overwrite = optional_bool(&args, "overwrite").unwrap_or(true);
        let fs = workspace_fs!(self, ctx);
        let mut reader = fs
            .open_read(from)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let mut writer = fs
            .open_write(to, overwrite)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let mut copied = 0usize;
        while let Some(chunk) = reader
            .read_chunk()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?
        {
            copied += chunk.len();
            writer
                .write_chunk(&chunk)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;
        }
        writer
            .close()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("copied {} bytes {} -> {}", copied, from, to))
    }
}

async fn asset_fs(fs_registry: &FsRegistry, args: &Value) -> Result<Arc<dyn RemoteFs>, ToolError> {
    let asset_id = required_str(args, "asset_id")?;
    fs_registry
        .open(&Endpoint::Asset {
            asset_id: asset_id.to_string(),
        })
        .await
        .map_err(|e| ToolError::Execution(e.to_string()))
}

fn asset_path_schema(extra: Value) -> Value {
    let mut schema = path_schema(extra);
    if let Some(obj) = schema["properties"].as_object_mut() {
        obj.insert(
            "asset_id".to_string(),
            json!({"type": "string", "description": "Target asset id."}),
        );
    }
    schema["required"] = json!(["asset_id", "path"]);
    schema
}

pub struct AssetFsListTool {
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for AssetFsListTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "asset_fs_list",
                name: "List directory on asset",
                description: "List a directory on a named remote asset.",
                category: ToolCategory::Asset,
                scope: ToolScope::Global,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: asset_path_schema(json!({
                    "include_hidden": {"type": "boolean", "default": false}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let include_hidden = optional_bool(&args, "include_hidden").unwrap_or(false);
        let fs = asset_fs(&self.fs_registry, &args).await?;
        let entries = fs
            .list_dir(path, include_hidden)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(render_entries(&entries))
    }
}

pub struct AssetFsReadTool {
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for AssetFsReadTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "asset_fs_read",
                name: "Read file on asset",
                description: "Read a text file from a named remote asset, cat -n style.",
                category: ToolCategory::Asset,
                scope: ToolScope::Global,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: asset_path_schema(json!({
                    "offset": {"type": "integer", "minimum": 0},
                    "limit": {"type": "integer", "minimum": 1}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);
        let fs = asset_fs(&self.fs_registry, &args).await?;
        render_file(fs.as_ref(), path, offset, limit).await
    }
}

pub struct AssetFsWriteTool {
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for AssetFsWriteTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "asset_fs_write",
                name: "Write file on asset",
                description: "Write full file content on a named remote asset.",
                category: ToolCategory::Asset,
                scope: ToolScope::Global,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: asset_path_schema(json!({
                    "content": {"type": "string"},
                    "overwrite": {"type": "boolean", "default": true}
                })),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let overwrite = optional_bool(&args, "overwrite").unwrap_or(true);
        let fs = asset_fs(&self.fs_registry, &args).await?;
        write_all(fs.as_ref(), path, content.as_bytes(), overwrite).await?;
        Ok(format!("wrote {} bytes to {}", content.len(), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_have_consistent_schemas() {
        let schema = path_schema(json!({"limit": {"type": "integer"}}));
        assert_eq!(schema["required"][0], "path");
        assert!(schema["properties"]["limit"].is_object());

        let asset = asset_path_schema(json!({}));
        assert_eq!(asset["required"], json!(["asset_id", "path"]));
    }

    #[test]
    fn render_entries_formats_rows() {
        let entries = vec![remote_fs::FsEntry {
            name: "src".into(),
            path: "/src".into(),
            is_dir: true,
            size: 4096,
            mode: "drwxr-xr-x".into(),
            modified_ms: 0,
        }];
        let out = render_entries(&entries);
        assert!(out.contains("src/"));
        assert!(out.contains("drwxr-xr-x"));
    }
}
