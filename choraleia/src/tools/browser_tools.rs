//! Browser tools: thin passthroughs to the browser-automation collaborator.
//! The whole category shares one headful session, so dispatch never runs two
//! of these concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::schema::required_str;
use super::{
    BrowserService, Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation,
    ToolRegistry, ToolRuntimeEnv, ToolScope,
};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    registry.register(Arc::new(BrowserStartTool {
        browser: Arc::clone(&ctx.browser),
    }))?;
    registry.register(Arc::new(BrowserNavigateTool {
        browser: Arc::clone(&ctx.browser),
    }))?;
    registry.register(Arc::new(BrowserInteractTool {
        browser: Arc::clone(&ctx.browser),
    }))?;
    registry.register(Arc::new(BrowserExtractTool {
        browser: Arc::clone(&ctx.browser),
    }))?;
    registry.register(Arc::new(BrowserStopTool {
        browser: Arc::clone(&ctx.browser),
    }))?;
    Ok(())
}

pub struct BrowserStartTool {
    browser: Arc<dyn BrowserService>,
}

#[async_trait]
impl Tool for BrowserStartTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "browser_start",
                name: "Start browser",
                description: "Start (or reuse) the workspace browser session; returns its instance id.",
                category: ToolCategory::Browser,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({"type": "object", "properties": {}}),
            }
        });
        &DEF
    }

    async fn invoke(&self, _args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        let workspace_id = ctx
            .workspace_id()
            .ok_or_else(|| ToolError::Execution("browser tools need a workspace".into()))?;
        let instance = self.browser.start(workspace_id).await?;
        Ok(format!("browser instance: {}", instance))
    }
}

pub struct BrowserNavigateTool {
    browser: Arc<dyn BrowserService>,
}

#[async_trait]
impl Tool for BrowserNavigateTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "browser_navigate",
                name: "Navigate browser",
                description: "Navigate the browser session to a URL.",
                category: ToolCategory::Browser,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "instance_id": {"type": "string"},
                        "url": {"type": "string"}
                    },
                    "required": ["instance_id", "url"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let instance = required_str(&args, "instance_id")?;
        let url = required_str(&args, "url")?;
        self.browser.navigate(instance, url).await?;
        Ok(format!("navigated to {}", url))
    }
}

pub struct BrowserInteractTool {
    browser: Arc<dyn BrowserService>,
}

#[async_trait]
impl Tool for BrowserInteractTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "browser_interact",
                name: "Interact with page",
                description: "Perform one interaction (click, type, scroll) described as a JSON action.",
                category: ToolCategory::Browser,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "instance_id": {"type": "string"},
                        "action": {"type": "object"}
                    },
                    "required": ["instance_id", "action"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let instance = required_str(&args, "instance_id")?;
        let action = args
            .get("action")
            .cloned()
            .ok_or_else(|| ToolError::InvalidArguments("missing 'action'".into()))?;
        self.browser.interact(instance, action).await
    }
}

pub struct BrowserExtractTool {
    browser: Arc<dyn BrowserService>,
}

#[async_trait]
impl Tool for BrowserExtractTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "browser_extract",
                name: "Extract from page",
                description: "Extract page content matching a selector or description.",
                category: ToolCategory::Browser,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "instance_id": {"type": "string"},
                        "query": {"type": "string"}
                    },
                    "required": ["instance_id", "query"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let instance = required_str(&args, "instance_id")?;
        let query = required_str(&args, "query")?;
        self.browser.extract(instance, query).await
    }
}

pub struct BrowserStopTool {
    browser: Arc<dyn BrowserService>,
}

#[async_trait]
impl Tool for BrowserStopTool {
    fn definition(&self) -> &ToolDefinition {
        static DEF: once_cell::sync::Lazy<ToolDefinition> = once_cell::sync::Lazy::new(|| {
            ToolDefinition {
                id: "browser_stop",
                name: "Stop browser",
                description: "Stop the browser session.",
                category: ToolCategory::Browser,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "instance_id": {"type": "string"}
                    },
                    "required": ["instance_id"]
                }),
            }
        });
        &DEF
    }

    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        let instance = required_str(&args, "instance_id")?;
        self.browser.stop(instance).await?;
        Ok("browser stopped".to_string())
    }
}
