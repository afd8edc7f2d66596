//! The central state machine: one instance of [`Orchestrator::run`] serves
//! one (conversation, new-assistant-message) pair.
//!
//! `Composing -> Streaming -> DispatchingTools -> Streaming -> ... -> Final`.
//! Deltas are persisted as chunks (buffered, flushed on boundaries) and
//! forwarded to the router's event channel; tool calls are dispatched under
//! the ordering rules in [`dispatch`]; cancellation fans out from the
//! per-conversation token to the provider stream and every live tool.

pub mod compose;
pub mod dispatch;
pub mod session;
pub mod summarize;
pub mod title;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use choraleia_store::{Message, MessageRole, MessageStatus, Store, Workspace};
use config::LlmModelConfig;
use stream_chunk::{DeltaEvent, FinishReason, MessageChunk, Usage};

use crate::error::CoreError;
use crate::message::{ChatMessage, ToolCallRequest};
use crate::provider::{ChatOptions, LlmProvider, ToolSchema};
use crate::runtime::WorkspaceRuntimeManager;
use crate::tools::{load_workspace_tools, BoundTool, ToolInvocation, ToolRegistry};

pub use compose::{AttachedFile, HotContext};
pub use dispatch::{PreparedCall, ToolCompletion};
pub use session::{CancelRegistry, OrchestratorEvent};
pub use title::TitleJobs;

/// Flush threshold for the streaming chunk buffer.
const BUFFER_FLUSH_BYTES: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    New,
    Edit,
    Regenerate,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Action::New),
            "edit" => Some(Action::Edit),
            "regenerate" => Some(Action::Regenerate),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Turn budget per assistant message.
    pub max_iterations: usize,
    /// Ceiling for concurrently running read-only tools.
    pub tool_parallelism: usize,
    /// Overall ceiling for one provider stream.
    pub stream_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            max_iterations: 25,
            tool_parallelism: 4,
            stream_timeout: Duration::from_secs(300),
        }
    }
}

/// Inputs for one completion run, resolved by the router.
pub struct RunInput {
    pub conversation_id: String,
    pub workspace_id: Option<String>,
    pub model: LlmModelConfig,
    /// New user message text; None on regenerate.
    pub user_text: Option<String>,
    pub parent_id: Option<String>,
    pub source_id: Option<String>,
    pub action: Action,
    pub safe_mode: bool,
    pub supervisor: bool,
    pub options: ChatOptions,
    pub hot_context: HotContext,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub conversation_id: String,
    pub user_message_id: Option<String>,
    pub assistant_message_id: String,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    /// Final plain-text content of the assistant message.
    pub content: String,
}

pub struct Orchestrator {
    store: Arc<Store>,
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    runtime: Arc<WorkspaceRuntimeManager>,
    cancels: Arc<CancelRegistry>,
    titles: Arc<TitleJobs>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        runtime: Arc<WorkspaceRuntimeManager>,
        cancels: Arc<CancelRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Orchestrator {
            store,
            provider,
            registry,
            runtime,
            cancels,
            titles: Arc::new(TitleJobs::new()),
            settings,
        }
    }

    pub fn cancels(&self) -> &Arc<CancelRegistry> {
        &self.cancels
    }

    pub fn runtime(&self) -> &Arc<WorkspaceRuntimeManager> {
        &self.runtime
    }

    /// Runs one completion, streaming events into `events`. Pre-stream
    /// failures surface as `Err`; anything after the stream opens is
    /// contained in the stream and still returns `Ok`.
    pub async fn run(
        &self,
        input: RunInput,
        events: mpsc::Sender<OrchestratorEvent>,
    ) -> Result<RunOutcome, CoreError> {
        let conversation = self.store.get_conversation(&input.conversation_id).await?;
        let workspace = match &input.workspace_id {
            Some(id) => Some(self.store.get_workspace(id).await?),
            None => match &conversation.workspace_id {
                Some(id) => self.store.get_workspace(id).await.ok(),
                None => None,
            },
        };

        let cancel = self.cancels.begin(&conversation.id)?;
        let result = self
            .run_guarded(&input, &conversation.id, workspace, cancel, events)
            .await;
        self.cancels.finish(&conversation.id);
        result
    }

    async fn run_guarded(
        &self,
        input: &RunInput,
        conversation_id: &str,
        workspace: Option<Workspace>,
        cancel: CancellationToken,
        events: mpsc::Sender<OrchestratorEvent>,
    ) -> Result<RunOutcome, CoreError> {
        // For a plain new message the parent defaults to the tip of the
        // current branch; edit and regenerate take parent_id literally
        // (None means a root-level branch).
        let default_parent = match (input.action, input.parent_id.clone()) {
            (Action::New, None) => self
                .store
                .list_messages(conversation_id, None)
                .await?
                .last()
                .map(|m| m.id.clone()),
            (_, explicit) => explicit,
        };

        let user_message_id = if input.action != Action::Regenerate {
            let text = input.user_text.clone().ok_or_else(|| {
                CoreError::UserInput("user message content is required".into())
            })?;
            let source = (input.action == Action::Edit)
                .then(|| input.source_id.clone())
                .flatten();
            let message = self
                .store
                .create_message(
                    conversation_id,
                    MessageRole::User,
                    default_parent.as_deref(),
                    source.as_deref(),
                    vec![MessageChunk::text(text)],
                )
                .await?;
            Some(message.id)
        } else {
            None
        };

        let assistant_parent = user_message_id.clone().or(default_parent);
        let assistant_source = (input.action == Action::Regenerate)
            .then(|| input.source_id.clone())
            .flatten();
        let assistant_id = self
            .store
            .begin_assistant_message(
                conversation_id,
                assistant_parent.as_deref(),
                assistant_source.as_deref(),
            )
            .await?;
        self.store.touch_conversation(conversation_id).await?;

        let mut session = StreamSession {
            orchestrator: self,
            conversation_id,
            assistant_id: assistant_id.clone(),
            workspace,
            cancel,
            events,
            events_dead: false,
            buffer: ChunkBuffer::default(),
            usage: None,
        };
        let finish = session.drive(input).await;
        let message = self.store.get_message(&assistant_id).await?;

        if finish == FinishReason::Stop || finish == FinishReason::Length {
            self.maybe_generate_title(input, conversation_id, &message)
                .await;
        }

        Ok(RunOutcome {
            conversation_id: conversation_id.to_string(),
            user_message_id,
            assistant_message_id: assistant_id,
            finish_reason: finish,
            usage: message.usage,
            content: message.content,
        })
    }

    /// Explicit one-shot title generation for the dedicated endpoint: uses
    /// the first exchange on the current branch and overwrites the title.
    pub async fn generate_title(
        &self,
        conversation_id: &str,
        model: &LlmModelConfig,
    ) -> Result<String, CoreError> {
        let messages = self.store.list_messages(conversation_id, None).await?;
        let user_text = messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let assistant_text = messages
            .iter()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if user_text.is_empty() && assistant_text.is_empty() {
            return Err(CoreError::UserInput(
                "conversation has no content to title".into(),
            ));
        }
        let prompt = vec![
            ChatMessage::system(
                "Produce a conversation title of at most six words. \
                 Respond with the title only, no quotes, no punctuation at the end.",
            ),
            ChatMessage::user(format!("User: {}\nAssistant: {}", user_text, assistant_text)),
        ];
        let options = ChatOptions {
            max_tokens: Some(32),
            ..Default::default()
        };
        let raw = self.provider.complete(model, &prompt, &options).await?;
        let title = title::clamp_title(&raw);
        if title.is_empty() {
            return Err(CoreError::Provider(crate::provider::ProviderError::Decode(
                "empty title from provider".into(),
            )));
        }
        self.store
            .update_conversation(conversation_id, Some(&title), None)
            .await?;
        Ok(title)
    }

    async fn maybe_generate_title(
        &self,
        input: &RunInput,
        conversation_id: &str,
        assistant: &Message,
    ) {
        let untitled = self
            .store
            .get_conversation(conversation_id)
            .await
            .map(|c| c.title.as_deref().unwrap_or("").is_empty())
            .unwrap_or(false);
        if !untitled {
            return;
        }
        let user_text = input.user_text.clone().unwrap_or_default();
        self.titles.spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            input.model.clone(),
            conversation_id.to_string(),
            user_text,
            assistant.content.clone(),
        );
    }
}

/// Buffered chunk writer: merges adjacent same-kind fragments in memory and
/// flushes to the store on size or kind boundaries. Best-effort while
/// streaming; finalize makes the log durable.
#[derive(Default)]
struct ChunkBuffer {
    pending: Vec<MessageChunk>,
    pending_bytes: usize,
}

impl ChunkBuffer {
    fn push_text(&mut self, text: &str) {
        self.pending_bytes += text.len();
        if let Some(MessageChunk::Text { text: last }) = self.pending.last_mut() {
            last.push_str(text);
            return;
        }
        self.pending.push(MessageChunk::text(text));
    }

    fn push_reasoning(&mut self, text: &str) {
        self.pending_bytes += text.len();
        if let Some(MessageChunk::Reasoning { text: last }) = self.pending.last_mut() {
            last.push_str(text);
            return;
        }
        self.pending.push(MessageChunk::reasoning(text));
    }

    fn push_chunk(&mut self, chunk: MessageChunk) {
        self.pending.push(chunk);
        self.pending_bytes += 64;
    }

    fn should_flush(&self) -> bool {
        self.pending_bytes >= BUFFER_FLUSH_BYTES
    }

    async fn flush(&mut self, store: &Store, message_id: &str) {
        if self.pending.is_empty() {
            return;
        }
        let chunks = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        if let Err(e) = store.append_chunks(message_id, &chunks).await {
            tracing::warn!(message = %message_id, "chunk append failed: {}", e);
        }
    }
}

/// In-flight accumulation slot for one tool call, keyed by stream index.
#[derive(Default)]
struct ToolCallSlot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

struct StreamSession<'a> {
    orchestrator: &'a Orchestrator,
    conversation_id: &'a str,
    assistant_id: String,
    workspace: Option<Workspace>,
    cancel: CancellationToken,
    events: mpsc::Sender<OrchestratorEvent>,
    events_dead: bool,
    buffer: ChunkBuffer,
    usage: Option<Usage>,
}

enum TurnEnd {
    Finish(FinishReason),
    ToolCalls(Vec<PreparedCall>, Option<String>),
    Cancelled,
    ProviderError(String),
    BadToolArguments { name: String, id: String },
}

impl<'a> StreamSession<'a> {
    fn store(&self) -> &Store {
        &self.orchestrator.store
    }

    /// A slow or gone client never stalls the run: events are dropped once
    /// the channel backs up, and persistence continues to natural end.
    fn emit(&mut self, event: OrchestratorEvent) {
        if self.events_dead {
            return;
        }
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("event channel full; treating client as gone");
                self.events_dead = true;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.events_dead = true;
            }
        }
    }

    fn add_usage(&mut self, usage: Option<Usage>) {
        let Some(u) = usage else { return };
        let total = self.usage.get_or_insert(Usage::default());
        total.prompt_tokens += u.prompt_tokens;
        total.completion_tokens += u.completion_tokens;
        total.total_tokens += u.total_tokens;
    }

    async fn drive(&mut self, input: &RunInput) -> FinishReason {
        match self.drive_inner(input).await {
            Ok(reason) => reason,
            Err(e) => {
                // Post-open failures are contained: persisted and streamed,
                // never surfaced as an HTTP error.
                tracing::warn!(conversation = %self.conversation_id, "stream failed: {}", e);
                self.fail(FinishReason::Error, Some("The assistant run failed internally."))
                    .await;
                FinishReason::Error
            }
        }
    }

    async fn drive_inner(&mut self, input: &RunInput) -> Result<FinishReason, CoreError> {
        let store = Arc::clone(&self.orchestrator.store);
        store
            .set_message_status(&self.assistant_id, MessageStatus::Streaming)
            .await?;
        self.emit(OrchestratorEvent::Role);

        let mut tools = load_workspace_tools(
            &self.orchestrator.registry,
            &store,
            self.workspace.as_ref().map(|w| w.id.as_str()),
            input.safe_mode,
        )
        .await?;
        if input.supervisor {
            tools.push(transfer_to_agent_tool());
        }
        let tool_schemas: Vec<ToolSchema> = tools.iter().map(|t| t.schema()).collect();

        let mut messages = self.compose_messages(input, &tools).await?;

        let mut iterations = 0usize;
        loop {
            if iterations >= self.orchestrator.settings.max_iterations {
                tracing::warn!(
                    conversation = %self.conversation_id,
                    "iteration budget exhausted"
                );
                return Ok(self.succeed(FinishReason::Length).await);
            }
            iterations += 1;

            let schemas = (!tool_schemas.is_empty()).then_some(tool_schemas.as_slice());
            let stream = self
                .orchestrator
                .provider
                .stream_chat(&input.model, &messages, schemas, &input.options)
                .await;
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    self.fail(FinishReason::Error, Some(&redact_provider_error(&e.to_string())))
                        .await;
                    return Ok(FinishReason::Error);
                }
            };

            match self.consume_turn(stream).await {
                TurnEnd::Cancelled => {
                    self.fail(FinishReason::Cancelled, None).await;
                    return Ok(FinishReason::Cancelled);
                }
                TurnEnd::ProviderError(message) => {
                    self.fail(FinishReason::Error, Some(&redact_provider_error(&message)))
                        .await;
                    return Ok(FinishReason::Error);
                }
                TurnEnd::BadToolArguments { name, id } => {
                    let chunk = MessageChunk::tool_result(
                        id.clone(),
                        format!("arguments for {} were not valid JSON", name),
                        false,
                    );
                    self.buffer.push_chunk(chunk);
                    self.emit(OrchestratorEvent::ToolResult {
                        tool_call_id: id,
                        tool_name: name,
                        result: "arguments were not valid JSON".into(),
                        success: false,
                    });
                    self.fail(FinishReason::Error, None).await;
                    return Ok(FinishReason::Error);
                }
                TurnEnd::Finish(reason) => {
                    return Ok(self.succeed(reason).await);
                }
                TurnEnd::ToolCalls(calls, turn_text) => {
                    messages.push(ChatMessage::assistant_tool_calls(
                        turn_text,
                        calls
                            .iter()
                            .map(|c| ToolCallRequest {
                                id: c.id.clone(),
                                name: c.name.clone(),
                                arguments: c.raw_arguments.clone(),
                            })
                            .collect(),
                    ));
                    let cancelled = self.run_tools(calls, &tools, &mut messages).await;
                    if cancelled {
                        self.fail(FinishReason::Cancelled, None).await;
                        return Ok(FinishReason::Cancelled);
                    }
                }
            }
        }
    }

    async fn compose_messages(
        &self,
        input: &RunInput,
        tools: &[BoundTool],
    ) -> Result<Vec<ChatMessage>, CoreError> {
        let store = self.store();
        let mut chain = store
            .list_messages(self.conversation_id, Some(&self.assistant_id))
            .await?;
        // Drop the open assistant message itself.
        chain.retain(|m| m.id != self.assistant_id);

        // Substitute the latest compression snapshot, then re-check budget.
        if let Some(snapshot) = store
            .latest_compression_snapshot(self.conversation_id)
            .await?
        {
            let covered: std::collections::HashSet<&str> =
                snapshot.messages.iter().map(|m| m.id.as_str()).collect();
            if chain.iter().any(|m| covered.contains(m.id.as_str())) {
                let mut substituted =
                    vec![summarize::synthetic_summary(self.conversation_id, &snapshot.summary)];
                substituted.extend(chain.into_iter().filter(|m| !covered.contains(m.id.as_str())));
                chain = substituted;
            }
        }
        let chain = summarize::maybe_summarize(
            store,
            &self.orchestrator.provider,
            &input.model,
            self.conversation_id,
            chain,
        )
        .await;

        let asset_names = match &self.workspace {
            Some(workspace) => {
                let refs = store.list_workspace_asset_refs(&workspace.id).await?;
                let mut names = Vec::new();
                for asset_id in refs {
                    if let Ok(asset) = store.get_asset(&asset_id).await {
                        names.push(asset.name);
                    }
                }
                names
            }
            None => Vec::new(),
        };

        let mut messages = vec![ChatMessage::system(compose::build_system_prompt(
            self.workspace.as_ref(),
            &asset_names,
            tools,
            input.supervisor,
        ))];
        for message in &chain {
            messages.extend(compose::message_to_chat(message));
        }
        if !input.hot_context.is_empty() {
            messages.push(ChatMessage::user(input.hot_context.render()));
        }
        Ok(messages)
    }

    /// Consumes one provider stream until its finish marker.
    async fn consume_turn(&mut self, mut stream: crate::provider::DeltaStream) -> TurnEnd {
        let store = Arc::clone(&self.orchestrator.store);
        let deadline = tokio::time::Instant::now() + self.orchestrator.settings.stream_timeout;
        let mut slots: BTreeMap<u32, ToolCallSlot> = BTreeMap::new();
        let mut turn_text = String::new();
        let cancel = self.cancel.clone();

        let finish = loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => return TurnEnd::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    return TurnEnd::ProviderError("provider stream timed out".into());
                }
            };
            match next {
                None => break FinishReason::Stop,
                Some(Err(e)) => return TurnEnd::ProviderError(e.to_string()),
                Some(Ok(DeltaEvent::Text(text))) => {
                    turn_text.push_str(&text);
                    self.buffer.push_text(&text);
                    self.emit(OrchestratorEvent::Text(text));
                    if self.buffer.should_flush() {
                        self.buffer.flush(&store, &self.assistant_id).await;
                    }
                }
                Some(Ok(DeltaEvent::Reasoning(text))) => {
                    self.buffer.push_reasoning(&text);
                    self.emit(OrchestratorEvent::Reasoning(text.clone()));
                    if self.buffer.should_flush() {
                        self.buffer.flush(&store, &self.assistant_id).await;
                    }
                }
                Some(Ok(DeltaEvent::ToolCallFragment {
                    index,
                    id,
                    name,
                    arguments,
                })) => {
                    let slot = slots.entry(index).or_default();
                    if let Some(id) = &id {
                        slot.id = Some(id.clone());
                    }
                    if let Some(name) = &name {
                        slot.name = Some(name.clone());
                    }
                    slot.arguments.push_str(&arguments);
                    self.emit(OrchestratorEvent::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments,
                    });
                }
                Some(Ok(DeltaEvent::Finish { reason, usage })) => {
                    self.add_usage(usage);
                    break reason;
                }
            }
        };
        self.buffer.flush(&store, &self.assistant_id).await;

        if finish != FinishReason::ToolCalls || slots.is_empty() {
            return TurnEnd::Finish(finish);
        }

        // Validate accumulated argument fragments as JSON; a parse failure
        // ends the turn with finish_reason=error and a synthetic result.
        let mut calls = Vec::with_capacity(slots.len());
        for (index, slot) in slots {
            let id = slot
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
            let name = slot.name.unwrap_or_default();
            let raw = if slot.arguments.trim().is_empty() {
                "{}".to_string()
            } else {
                slot.arguments
            };
            let call_chunk = MessageChunk::ToolCall {
                tool_call_id: id.clone(),
                tool_name: name.clone(),
                arguments: raw.clone(),
            };
            self.buffer.push_chunk(call_chunk);
            match serde_json::from_str::<Value>(&raw) {
                Ok(arguments) => calls.push(PreparedCall {
                    index,
                    id,
                    name,
                    arguments,
                    raw_arguments: raw,
                }),
                Err(_) => {
                    self.buffer.flush(&store, &self.assistant_id).await;
                    return TurnEnd::BadToolArguments { name, id };
                }
            }
        }
        self.buffer.flush(&store, &self.assistant_id).await;
        let text = (!turn_text.is_empty()).then_some(turn_text);
        TurnEnd::ToolCalls(calls, text)
    }

    /// Dispatches one turn's tools and appends their results. Returns true
    /// when the run was cancelled mid-dispatch.
    async fn run_tools(
        &mut self,
        calls: Vec<PreparedCall>,
        tools: &[BoundTool],
        messages: &mut Vec<ChatMessage>,
    ) -> bool {
        let store = Arc::clone(&self.orchestrator.store);
        let base = ToolInvocation {
            workspace: self.workspace.clone(),
            options: Value::Null,
            cancel: self.cancel.clone(),
        };
        let mut rx = dispatch::dispatch(
            calls,
            tools,
            base,
            self.orchestrator.settings.tool_parallelism,
            self.cancel.clone(),
        );
        while let Some(completion) = rx.recv().await {
            let chunk = MessageChunk::tool_result(
                completion.call.id.clone(),
                completion.result.clone(),
                completion.success,
            );
            self.buffer.push_chunk(chunk);
            self.buffer.flush(&store, &self.assistant_id).await;
            self.emit(OrchestratorEvent::ToolResult {
                tool_call_id: completion.call.id.clone(),
                tool_name: completion.call.name.clone(),
                result: completion.result.clone(),
                success: completion.success,
            });
            let body = if completion.success {
                completion.result
            } else {
                format!("error: {}", completion.result)
            };
            messages.push(ChatMessage::tool_result(completion.call.id, body));
        }
        self.cancel.is_cancelled()
    }

    async fn succeed(&mut self, reason: FinishReason) -> FinishReason {
        let store = Arc::clone(&self.orchestrator.store);
        self.buffer.flush(&store, &self.assistant_id).await;
        if let Err(e) = store
            .finalize_message(
                &self.assistant_id,
                MessageStatus::Completed,
                reason.as_str(),
                self.usage,
            )
            .await
        {
            tracing::error!(message = %self.assistant_id, "finalize failed: {}", e);
        }
        let _ = store.touch_conversation(self.conversation_id).await;
        self.emit(OrchestratorEvent::Finish {
            reason,
            usage: self.usage,
        });
        reason
    }

    async fn fail(&mut self, reason: FinishReason, synthetic_text: Option<&str>) {
        let store = Arc::clone(&self.orchestrator.store);
        if let Some(text) = synthetic_text {
            self.buffer.push_chunk(MessageChunk::text(text));
        }
        self.buffer.flush(&store, &self.assistant_id).await;
        let status = match reason {
            FinishReason::Cancelled => MessageStatus::Cancelled,
            _ => MessageStatus::Error,
        };
        if let Err(e) = store
            .finalize_message(&self.assistant_id, status, reason.as_str(), self.usage)
            .await
        {
            tracing::error!(message = %self.assistant_id, "finalize failed: {}", e);
        }
        let _ = store.touch_conversation(self.conversation_id).await;
        self.emit(OrchestratorEvent::Finish {
            reason,
            usage: self.usage,
        });
    }
}

/// Provider failures reach the user as one redacted line; details stay in
/// the log.
fn redact_provider_error(message: &str) -> String {
    tracing::warn!("provider error: {}", message);
    "The model provider returned an error; the turn was ended.".to_string()
}

/// Supervisor pseudo-tool: hands the turn to a child agent.
fn transfer_to_agent_tool() -> BoundTool {
    use crate::tools::{Tool, ToolCategory, ToolDefinition, ToolError, ToolRuntimeEnv, ToolScope};
    use async_trait::async_trait;

    struct TransferToAgent {
        def: ToolDefinition,
    }

    #[async_trait]
    impl Tool for TransferToAgent {
        fn definition(&self) -> &ToolDefinition {
            &self.def
        }
        async fn invoke(
            &self,
            args: Value,
            _ctx: &ToolInvocation,
        ) -> Result<String, ToolError> {
            let agent_id = args
                .get("agent_id")
                .and_then(Value::as_str)
                .ok_or_else(|| ToolError::InvalidArguments("missing 'agent_id'".into()))?;
            Ok(format!("control transferred to agent {}", agent_id))
        }
    }

    BoundTool {
        tool: Arc::new(TransferToAgent {
            def: ToolDefinition {
                id: "transfer_to_agent",
                name: "Transfer to agent",
                description: "Hand the current task to a child agent from the workspace agent graph.",
                category: ToolCategory::Workspace,
                scope: ToolScope::Workspace,
                dangerous: false,
                runtime_env: ToolRuntimeEnv::Local,
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "agent_id": {"type": "string", "description": "Child agent id."}
                    },
                    "required": ["agent_id"]
                }),
            },
        }),
        options: Value::Null,
    }
}
