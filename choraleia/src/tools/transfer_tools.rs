//! Transfer tools: move content between the workspace filesystem and a
//! remote asset. Uploads and downloads stream file content through the
//! chunked reader/writer pair; sync walks a directory tree and copies file
//! by file.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use remote_fs::{Endpoint, FsRegistry, RemoteFs};

use crate::runtime::WorkspaceRuntimeManager;

use super::schema::required_str;
use super::{
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    registry.register(Arc::new(TransferUploadTool {
        runtime: Arc::clone(&ctx.runtime),
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    registry.register(Arc::new(TransferDownloadTool {
        runtime: Arc::clone(&ctx.runtime),
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    registry.register(Arc::new(TransferSyncTool {
        runtime: Arc::clone(&ctx.runtime),
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    Ok(())
}

fn transfer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "asset_id": {"type": "string"},
            "local_path": {"type": "string", "description": "Path on the workspace filesystem."},
            "remote_path": {"type": "string", "description": "Path on the asset."}
        },
        "required": ["asset_id", "local_path", "remote_path"]
    })
}

async fn copy_file(
    src: &dyn RemoteFs,
    src_path: &str,
    dst: &dyn RemoteFs,
    dst_path: &str,
) -> Result<usize, ToolError> {
    let exec_err = |e: remote_fs::FsError| ToolError::Execution(e.to_string());
    let mut reader = src.open_read(src_path).await.map_err(exec_err)?;
    let mut writer = dst.open_write(dst_path, true).await.map_err(exec_err)?;
    let mut copied = 0usize;
    while let Some(chunk) = reader.read_chunk().await.map_err(exec_err)? {
        copied += chunk.len();
        writer.write_chunk(&chunk).await.map_err(exec_err)?;
    }
    writer.close().await.map_err(exec_err)?;
    Ok(copied)
}

/// Recursively copies `src_dir` into `dst_dir`. Returns files copied.
async fn sync_dir(
    src: &dyn RemoteFs,
    src_dir: &str,
    dst: &dyn RemoteFs,
    dst_dir: &str,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<usize, ToolError> {
    let exec_err = |e: remote_fs::FsError| ToolError::Execution(e.to_string());
    dst.mkdir_all(dst_dir).await.map_err(exec_err)?;
    let mut copied = 0usize;
    let mut pending = vec![(src_dir.to_string(), dst_dir.to_string())];
    while let Some((from_dir, to_dir)) = pending.pop() {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        for entry in src.list_dir(&from_dir, true).await.map_err(exec_err)? {
            let target = format!("{}/{}", to_dir.trim_end_matches('/'), entry.name);
            if entry.is_dir {
                dst.mkdir_all(&target).await.map_err(exec_err)?;
                pending.push((entry.path, target));
            } else {
                copy_file(src, &entry.path, dst, &target).await?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

pub struct TransferUploadTool {
    runtime: Arc<WorkspaceRuntimeManager>,
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for TransferUploadTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "transfer_upload",
                name: "Upload to asset",
                description: "Copy a file from the workspace filesystem to a remote asset.",
                category: ToolCategory::Transfer,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: transfer_schema(),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let asset_id = required_str(&args, "asset_id")?;
        let local_path = required_str(&args, "local_path")?;
        let remote_path = required_str(&args, "remote_path")?;
        let local = self
            .runtime
            .fs_for(ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?;
        let remote = self
            .fs_registry
            .open(&Endpoint::Asset {
                asset_id: asset_id.to_string(),
            })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let copied = copy_file(local.as_ref(), local_path, remote.as_ref(), remote_path).await?;
        Ok(format!(
            "uploaded {} bytes {} -> {}:{}",
            copied, local_path, asset_id, remote_path
        ))
    }
}

pub struct TransferDownloadTool {
    runtime: Arc<WorkspaceRuntimeManager>,
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for TransferDownloadTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "transfer_download",
                name: "Download from asset",
                description: "Copy a file from a remote asset into the workspace filesystem.",
                category: ToolCategory::Transfer,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: transfer_schema(),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let asset_id = required_str(&args, "asset_id")?;
        let local_path = required_str(&args, "local_path")?;
        let remote_path = required_str(&args, "remote_path")?;
        let local = self
            .runtime
            .fs_for(ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?;
        let remote = self
            .fs_registry
            .open(&Endpoint::Asset {
                asset_id: asset_id.to_string(),
            })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let copied = copy_file(remote.as_ref(), remote_path, local.as_ref(), local_path).await?;
        Ok(format!(
            "downloaded {} bytes {}:{} -> {}",
            copied, asset_id, remote_path, local_path
        ))
    }
}

pub struct TransferSyncTool {
    runtime: Arc<WorkspaceRuntimeManager>,
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for TransferSyncTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "transfer_sync",
                name: "Sync directory to asset",
                description: "Recursively copy a workspace directory to a remote asset. \
                              Set direction=down to pull from the asset instead.",
                category: ToolCategory::Transfer,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "asset_id": {"type": "string"},
                        "local_path": {"type": "string"},
                        "remote_path": {"type": "string"},
                        "direction": {"enum": ["up", "down"], "default": "up"}
                    },
                    "required": ["asset_id", "local_path", "remote_path"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let asset_id = required_str(&args, "asset_id")?;
        let local_path = required_str(&args, "local_path")?;
        let remote_path = required_str(&args, "remote_path")?;
        let down = args.get("direction").and_then(Value::as_str) == Some("down");
        let local = self
            .runtime
            .fs_for(ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?;
        let remote = self
            .fs_registry
            .open(&Endpoint::Asset {
                asset_id: asset_id.to_string(),
            })
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let copied = if down {
            sync_dir(
                remote.as_ref(),
                remote_path,
                local.as_ref(),
                local_path,
                &ctx.cancel,
            )
            .await?
        } else {
            sync_dir(
                local.as_ref(),
                local_path,
                remote.as_ref(),
                remote_path,
                &ctx.cancel,
            )
            .await?
        };
        Ok(format!("synced {} files", copied))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_fs::LocalFs;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_dir_copies_tree_between_local_roots() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("a.txt"), b"one").unwrap();
        std::fs::write(src.path().join("sub/b.txt"), b"two").unwrap();

        let fs = LocalFs::new();
        let copied = sync_dir(
            &fs,
            &src.path().display().to_string(),
            &fs,
            &dst.path().display().to_string(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(copied, 2);
        assert_eq!(std::fs::read(dst.path().join("a.txt")).unwrap(), b"one");
        assert_eq!(std::fs::read(dst.path().join("sub/b.txt")).unwrap(), b"two");
    }
}
