//! Choraleia core: the agent orchestrator and everything it drives.
//!
//! - [`provider`]: provider-agnostic streaming chat contract plus the
//!   bundled OpenAI-compatible adapter and a scriptable mock.
//! - [`tools`]: static tool registry, per-workspace loader, and the built-in
//!   tool set (workspace fs/exec, code index, asset, transfer, browser,
//!   memory).
//! - [`runtime`]: resolves where a tool's side-effects land (host process,
//!   local container, remote container) and executes commands there.
//! - [`orchestrator`]: the streaming state machine that turns one user
//!   message into deltas, tool dispatch, and a persisted chunk log.

pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod runtime;
pub mod tools;

pub use error::CoreError;
pub use message::{ChatMessage, ChatRole, ContentPart, ToolCallRequest};
pub use orchestrator::{
    Action, CancelRegistry, HotContext, Orchestrator, OrchestratorEvent, OrchestratorSettings,
    RunInput, RunOutcome,
};
pub use provider::{ChatOptions, DeltaStream, LlmProvider, MockProvider, OpenAiCompatProvider,
    ProviderError, ResponseFormat, ToolSchema};
pub use runtime::{
    ExecResult, ExecutionSite, RuntimeEvent, RuntimeStatus, StoreAssetResolver,
    WorkspaceRuntimeManager,
};
pub use tools::{
    load_workspace_tools, register_builtin_tools, BoundTool, BrowserService, NullBrowserService,
    Tool, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolInvocation, ToolRegistry,
    ToolRuntimeEnv, ToolScope,
};
