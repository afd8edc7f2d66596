//! Execution tools: argv-preserving command execution, heredoc scripts, the
//! asset-side equivalents, and `exec_batch` across a list of assets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use remote_fs::FsRegistry;

use crate::runtime::{ExecutionSite, WorkspaceRuntimeManager};

use super::schema::{optional_bool, optional_str, required_str};
use super::{
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};

/// Exec tools run long; dispatch also enforces this ceiling.
const EXEC_TIMEOUT: Duration = Duration::from_secs(600);

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    registry.register(Arc::new(ExecCommandTool {
        runtime: Arc::clone(&ctx.runtime),
    }))?;
    registry.register(Arc::new(ExecScriptTool {
        runtime: Arc::clone(&ctx.runtime),
    }))?;
    registry.register(Arc::new(AssetExecTool {
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    registry.register(Arc::new(ExecBatchTool {
        fs_registry: ctx.fs_registry.clone(),
    }))?;
    Ok(())
}

fn argv_from(args: &Value) -> Result<Vec<String>, ToolError> {
    let argv: Vec<String> = args
        .get("argv")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .ok_or_else(|| ToolError::InvalidArguments("missing 'argv'".into()))?;
    if argv.is_empty() {
        return Err(ToolError::InvalidArguments("argv is empty".into()));
    }
    Ok(argv)
}

pub struct ExecCommandTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for ExecCommandTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "exec_command",
                name: "Execute command",
                description: "Run a command with its argv preserved (no shell interpretation). \
                              Runs inside the workspace runtime.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "argv": {"type": "array", "items": {"type": "string"}, "description": "Program and arguments."},
                        "cwd": {"type": "string", "description": "Working directory."}
                    },
                    "required": ["argv"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let argv = argv_from(&args)?;
        let cwd = optional_str(&args, "cwd");
        let site = self
            .runtime
            .resolve_site(ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?;
        let result = self
            .runtime
            .exec_command(&site, &argv, cwd, EXEC_TIMEOUT, &ctx.cancel)
            .await?;
        Ok(result.render())
    }
}

pub struct ExecScriptTool {
    runtime: Arc<WorkspaceRuntimeManager>,
}

#[async_trait]
impl Tool for ExecScriptTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "exec_script",
                name: "Execute script",
                description: "Run a multi-line script under a shell (default /bin/sh) via heredoc \
                              inside the workspace runtime.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Workspace,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "script": {"type": "string"},
                        "shell": {"type": "string", "default": "/bin/sh"}
                    },
                    "required": ["script"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let script = required_str(&args, "script")?;
        let shell = optional_str(&args, "shell");
        let site = self
            .runtime
            .resolve_site(ctx.workspace.as_ref(), ToolRuntimeEnv::Workspace)
            .await?;
        let result = self
            .runtime
            .exec_script(&site, script, shell, EXEC_TIMEOUT, &ctx.cancel)
            .await?;
        Ok(result.render())
    }
}

/// Runs one command on one SSH asset through the pooled client.
async fn exec_on_asset(
    fs_registry: &FsRegistry,
    asset_id: &str,
    command: &str,
) -> Result<remote_fs::ExecOutput, ToolError> {
    use remote_fs::AssetEndpoint;
    let resolver_err = |e: remote_fs::FsError| ToolError::Execution(e.to_string());
    let endpoint = fs_registry
        .resolver()
        .resolve(asset_id)
        .await
        .map_err(resolver_err)?;
    let cfg = match endpoint {
        AssetEndpoint::Ssh(cfg) | AssetEndpoint::DockerHostSsh(cfg) => cfg,
        AssetEndpoint::DockerHostLocal => {
            return Err(ToolError::Execution(format!(
                "asset {} is the local docker host, use exec_command",
                asset_id
            )))
        }
    };
    fs_registry
        .pool()
        .exec(&cfg, command, None)
        .await
        .map_err(resolver_err)
}

fn render_exec_output(out: &remote_fs::ExecOutput) -> String {
    let mut text = out.stdout_str();
    let stderr = out.stderr_str();
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str("stderr: ");
        text.push_str(stderr.trim_end());
    }
    if out.exit_code != 0 {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!("exit code: {}", out.exit_code));
    }
    if text.is_empty() {
        text.push_str("(no output)");
    }
    text
}

pub struct AssetExecTool {
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for AssetExecTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "asset_exec",
                name: "Execute on asset",
                description: "Run a shell command on a named SSH asset.",
                category: ToolCategory::Asset,
                scope: ToolScope::Global,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "asset_id": {"type": "string"},
                        "command": {"type": "string"}
                    },
                    "required": ["asset_id", "command"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let asset_id = required_str(&args, "asset_id")?;
        let command = required_str(&args, "command")?;
        let out = exec_on_asset(&self.fs_registry, asset_id, command).await?;
        Ok(render_exec_output(&out))
    }
}

pub struct ExecBatchTool {
    fs_registry: FsRegistry,
}

#[async_trait]
impl Tool for ExecBatchTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "exec_batch",
                name: "Execute on asset batch",
                description: "Run the same shell command across a list of assets, in order. \
                              stop_on_error aborts after the first nonzero exit.",
                category: ToolCategory::Asset,
                scope: ToolScope::Global,
                dangerous: true,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "asset_ids": {"type": "array", "items": {"type": "string"}},
                        "command": {"type": "string"},
                        "stop_on_error": {"type": "boolean", "default": false}
                    },
                    "required": ["asset_ids", "command"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let asset_ids: Vec<String> = args
            .get("asset_ids")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| ToolError::InvalidArguments("missing 'asset_ids'".into()))?;
        if asset_ids.is_empty() {
            return Err(ToolError::InvalidArguments("asset_ids is empty".into()));
        }
        let command = required_str(&args, "command")?;
        let stop_on_error = optional_bool(&args, "stop_on_error").unwrap_or(false);

        let mut report = String::new();
        for asset_id in &asset_ids {
            if ctx.cancel.is_cancelled() {
                return Err(ToolError::Cancelled);
            }
            report.push_str(&format!("=== {} ===\n", asset_id));
            match exec_on_asset(&self.fs_registry, asset_id, command).await {
                Ok(out) => {
                    let failed = out.exit_code != 0;
                    report.push_str(&render_exec_output(&out));
                    report.push('\n');
                    if failed && stop_on_error {
                        report.push_str("(stopped on first error)\n");
                        break;
                    }
                }
                Err(e) => {
                    report.push_str(&format!("error: {}\n", e));
                    if stop_on_error {
                        report.push_str("(stopped on first error)\n");
                        break;
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_from_requires_nonempty_array() {
        assert!(argv_from(&json!({"argv": ["ls", "-l"]})).is_ok());
        assert!(argv_from(&json!({"argv": []})).is_err());
        assert!(argv_from(&json!({})).is_err());
    }

    #[test]
    fn render_exec_output_includes_stderr_and_exit() {
        let out = remote_fs::ExecOutput {
            stdout: b"result".to_vec(),
            stderr: b"warning\n".to_vec(),
            exit_code: 2,
        };
        let text = render_exec_output(&out);
        assert!(text.contains("result"));
        assert!(text.contains("stderr: warning"));
        assert!(text.contains("exit code: 2"));
    }
}
