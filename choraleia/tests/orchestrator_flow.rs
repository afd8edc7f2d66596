//! End-to-end orchestrator runs against the scripted provider and a real
//! temporary store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use choraleia::{
    Action, CancelRegistry, HotContext, MockProvider, Orchestrator, OrchestratorEvent,
    OrchestratorSettings, RunInput, StoreAssetResolver, Tool, ToolCategory, ToolDefinition,
    ToolError, ToolInvocation, ToolRegistry, ToolRuntimeEnv, ToolScope, WorkspaceRuntimeManager,
};
use choraleia_store::{MessageStatus, Store};
use config::LlmModelConfig;
use remote_fs::SshPool;
use stream_chunk::{DeltaEvent, FinishReason, MessageChunk, Usage};

fn test_model() -> LlmModelConfig {
    serde_json::from_value(json!({
        "id": "m",
        "provider": "mock",
        "model": "m",
        "base_url": "http://localhost:0",
        "limits": {"max_tokens": 4096, "context_window": 100000}
    }))
    .unwrap()
}

struct EchoTool {
    def: ToolDefinition,
}

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> &ToolDefinition {
        &self.def
    }
    async fn invoke(&self, args: Value, _ctx: &ToolInvocation) -> Result<String, ToolError> {
        Ok(format!("echo: {}", args["value"].as_str().unwrap_or("")))
    }
}

struct SleepTool {
    def: ToolDefinition,
}

#[async_trait]
impl Tool for SleepTool {
    fn definition(&self) -> &ToolDefinition {
        &self.def
    }
    async fn invoke(&self, _args: Value, ctx: &ToolInvocation) -> Result<String, ToolError> {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok("slept".into()),
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
        }
    }
}

fn definition(id: &'static str, dangerous: bool) -> ToolDefinition {
    ToolDefinition {
        id,
        name: id,
        description: "test tool",
        category: ToolCategory::Workspace,
        scope: ToolScope::Workspace,
        dangerous,
        runtime_env: ToolRuntimeEnv::Local,
        parameters: json!({
            "type": "object",
            "properties": {"value": {"type": "string"}}
        }),
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    orchestrator: Orchestrator,
}

async fn harness(scripts: Vec<Vec<DeltaEvent>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join("t.db")).unwrap());
    let pool = SshPool::new();
    let resolver = Arc::new(StoreAssetResolver::new(Arc::clone(&store)));
    let runtime = WorkspaceRuntimeManager::new(pool, resolver, Arc::clone(&store));

    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(EchoTool {
            def: definition("echo", false),
        }))
        .unwrap();
    registry
        .register(Arc::new(SleepTool {
            def: definition("slow_sleep", false),
        }))
        .unwrap();

    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::new(MockProvider::new(scripts)),
        Arc::new(registry),
        runtime,
        Arc::new(CancelRegistry::new()),
        OrchestratorSettings::default(),
    );
    Harness {
        _dir: dir,
        store,
        orchestrator,
    }
}

fn input(conversation_id: &str, text: &str) -> RunInput {
    RunInput {
        conversation_id: conversation_id.to_string(),
        workspace_id: None,
        model: test_model(),
        user_text: Some(text.to_string()),
        parent_id: None,
        source_id: None,
        action: Action::New,
        safe_mode: false,
        supervisor: false,
        options: Default::default(),
        hot_context: HotContext::default(),
    }
}

async fn drain(mut rx: mpsc::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn streaming_chat_without_tools() {
    let h = harness(vec![vec![
        DeltaEvent::Text("Hello".into()),
        DeltaEvent::Text(" there".into()),
        DeltaEvent::Finish {
            reason: FinishReason::Stop,
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 2,
                total_tokens: 9,
            }),
        },
    ]])
    .await;
    let conversation = h.store.create_conversation(None, None, None, None).await.unwrap();
    let (tx, rx) = mpsc::channel(256);
    let outcome = h
        .orchestrator
        .run(input(&conversation.id, "hi"), tx)
        .await
        .unwrap();

    assert_eq!(outcome.finish_reason, FinishReason::Stop);
    assert_eq!(outcome.content, "Hello there");
    assert_eq!(outcome.usage.unwrap().total_tokens, 9);

    let events = drain(rx).await;
    assert!(matches!(events[0], OrchestratorEvent::Role));
    assert!(matches!(events.last().unwrap(), OrchestratorEvent::Finish { .. }));

    let messages = h.store.list_messages(&conversation.id, None).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, choraleia_store::MessageRole::User);
    assert_eq!(messages[1].status, MessageStatus::Completed);
    assert_eq!(messages[1].chunks, vec![MessageChunk::text("Hello there")]);
}

#[tokio::test(flavor = "multi_thread")]
async fn tool_call_round_trip_orders_chunks() {
    let h = harness(vec![
        vec![
            DeltaEvent::ToolCallFragment {
                index: 0,
                id: Some("call_1".into()),
                name: Some("echo".into()),
                arguments: "{\"value\":".into(),
            },
            DeltaEvent::ToolCallFragment {
                index: 0,
                id: None,
                name: None,
                arguments: "\"ping\"}".into(),
            },
            DeltaEvent::Finish {
                reason: FinishReason::ToolCalls,
                usage: None,
            },
        ],
        vec![
            DeltaEvent::Text("tool said ping".into()),
            DeltaEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            },
        ],
    ])
    .await;
    let conversation = h.store.create_conversation(None, None, None, None).await.unwrap();
    let (tx, rx) = mpsc::channel(256);
    let outcome = h
        .orchestrator
        .run(input(&conversation.id, "run echo"), tx)
        .await
        .unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Stop);

    let message = h.store.get_message(&outcome.assistant_message_id).await.unwrap();
    assert_eq!(message.chunks.len(), 3);
    assert!(matches!(
        &message.chunks[0],
        MessageChunk::ToolCall { tool_call_id, tool_name, arguments }
            if tool_call_id == "call_1" && tool_name == "echo"
                && arguments == "{\"value\":\"ping\"}"
    ));
    assert!(matches!(
        &message.chunks[1],
        MessageChunk::ToolResult { tool_call_id, result, success: true }
            if tool_call_id == "call_1" && result == "echo: ping"
    ));
    assert_eq!(message.chunks[2], MessageChunk::text("tool said ping"));

    // The tool-result event reached the wire before finish.
    let events = drain(rx).await;
    let result_pos = events
        .iter()
        .position(|e| matches!(e, OrchestratorEvent::ToolResult { .. }))
        .unwrap();
    let finish_pos = events
        .iter()
        .position(|e| matches!(e, OrchestratorEvent::Finish { .. }))
        .unwrap();
    assert!(result_pos < finish_pos);
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_tool_arguments_end_turn_with_error() {
    let h = harness(vec![vec![
        DeltaEvent::ToolCallFragment {
            index: 0,
            id: Some("call_bad".into()),
            name: Some("echo".into()),
            arguments: "{not json".into(),
        },
        DeltaEvent::Finish {
            reason: FinishReason::ToolCalls,
            usage: None,
        },
    ]])
    .await;
    let conversation = h.store.create_conversation(None, None, None, None).await.unwrap();
    let (tx, _rx) = mpsc::channel(256);
    let outcome = h
        .orchestrator
        .run(input(&conversation.id, "go"), tx)
        .await
        .unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Error);

    let message = h.store.get_message(&outcome.assistant_message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Error);
    let has_failed_result = message.chunks.iter().any(|c| {
        matches!(c, MessageChunk::ToolResult { success: false, .. })
    });
    assert!(has_failed_result);

    // The conversation stays usable: the default script answers plainly.
    let (tx, _rx) = mpsc::channel(256);
    let outcome = h
        .orchestrator
        .run(input(&conversation.id, "again"), tx)
        .await
        .unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Stop);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_interrupts_tool_dispatch() {
    let h = harness(vec![vec![
        DeltaEvent::ToolCallFragment {
            index: 0,
            id: Some("call_slow".into()),
            name: Some("slow_sleep".into()),
            arguments: "{}".into(),
        },
        DeltaEvent::Finish {
            reason: FinishReason::ToolCalls,
            usage: None,
        },
    ]])
    .await;
    let conversation = h.store.create_conversation(None, None, None, None).await.unwrap();
    let cancels = Arc::clone(h.orchestrator.cancels());
    let conversation_id = conversation.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(cancels.cancel(&conversation_id));
    });

    let (tx, _rx) = mpsc::channel(256);
    let started = std::time::Instant::now();
    let outcome = h
        .orchestrator
        .run(input(&conversation.id, "sleep"), tx)
        .await
        .unwrap();
    assert_eq!(outcome.finish_reason, FinishReason::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));

    let message = h.store.get_message(&outcome.assistant_message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Cancelled);
    assert!(!h.orchestrator.cancels().is_streaming(&conversation.id));
}

#[tokio::test(flavor = "multi_thread")]
async fn edit_creates_branch_and_default_listing_follows_it() {
    let h = harness(vec![
        vec![
            DeltaEvent::Text("first answer".into()),
            DeltaEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            },
        ],
        vec![
            DeltaEvent::Text("second answer".into()),
            DeltaEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            },
        ],
    ])
    .await;
    // Pre-titled so the background title job cannot consume the second
    // script between the two runs.
    let conversation = h
        .store
        .create_conversation(Some("titled"), None, None, None)
        .await
        .unwrap();
    let (tx, _rx) = mpsc::channel(256);
    let first = h
        .orchestrator
        .run(input(&conversation.id, "v1"), tx)
        .await
        .unwrap();

    let old_user = first.user_message_id.clone().unwrap();
    let mut edit_input = input(&conversation.id, "v2");
    edit_input.action = Action::Edit;
    edit_input.source_id = Some(old_user.clone());
    // The edited message replaces a root message, so the branch starts at
    // the root again: parent stays None.
    let (tx, _rx) = mpsc::channel(256);
    let second = h.orchestrator.run(edit_input, tx).await.unwrap();
    assert_eq!(second.content, "second answer");

    // Default branch is the new one.
    let current = h.store.list_messages(&conversation.id, None).await.unwrap();
    let texts: Vec<_> = current.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, ["v2", "second answer"]);
    assert_eq!(current[0].source_id.as_deref(), Some(old_user.as_str()));

    // The old branch is still reachable explicitly.
    let old = h
        .store
        .list_messages(&conversation.id, Some(&first.assistant_message_id))
        .await
        .unwrap();
    let texts: Vec<_> = old.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, ["v1", "first answer"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn default_branch_sticks_to_edit_after_old_branch_continues() {
    let stop = |text: &str| {
        vec![
            DeltaEvent::Text(text.into()),
            DeltaEvent::Finish {
                reason: FinishReason::Stop,
                usage: None,
            },
        ]
    };
    let h = harness(vec![
        stop("first answer"),
        stop("second answer"),
        stop("old branch answer"),
    ])
    .await;
    let conversation = h
        .store
        .create_conversation(Some("titled"), None, None, None)
        .await
        .unwrap();
    let (tx, _rx) = mpsc::channel(256);
    let first = h
        .orchestrator
        .run(input(&conversation.id, "v1"), tx)
        .await
        .unwrap();

    let old_user = first.user_message_id.clone().unwrap();
    let mut edit_input = input(&conversation.id, "v2");
    edit_input.action = Action::Edit;
    edit_input.source_id = Some(old_user.clone());
    let (tx, _rx) = mpsc::channel(256);
    h.orchestrator.run(edit_input, tx).await.unwrap();

    // Explicitly continue the superseded branch under the old assistant
    // reply; its messages now have the newest rowids in the table.
    let mut continue_old = input(&conversation.id, "follow up on v1");
    continue_old.parent_id = Some(first.assistant_message_id.clone());
    let (tx, _rx) = mpsc::channel(256);
    let third = h.orchestrator.run(continue_old, tx).await.unwrap();
    assert_eq!(third.content, "old branch answer");

    // v1 is still superseded by v2, so the default listing keeps following
    // the edited branch.
    let current = h.store.list_messages(&conversation.id, None).await.unwrap();
    let texts: Vec<_> = current.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, ["v2", "second answer"]);

    // The extended old branch stays reachable explicitly, tail included.
    let old = h
        .store
        .list_messages(&conversation.id, Some(&first.assistant_message_id))
        .await
        .unwrap();
    let texts: Vec<_> = old.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        texts,
        ["v1", "first answer", "follow up on v1", "old branch answer"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn second_stream_on_same_conversation_conflicts() {
    let h = harness(vec![vec![
        DeltaEvent::ToolCallFragment {
            index: 0,
            id: Some("call_slow".into()),
            name: Some("slow_sleep".into()),
            arguments: "{}".into(),
        },
        DeltaEvent::Finish {
            reason: FinishReason::ToolCalls,
            usage: None,
        },
    ]])
    .await;
    let conversation = h.store.create_conversation(None, None, None, None).await.unwrap();

    let cancels = Arc::clone(h.orchestrator.cancels());
    let token = cancels.begin(&conversation.id).unwrap();
    let (tx, _rx) = mpsc::channel(16);
    let err = h
        .orchestrator
        .run(input(&conversation.id, "x"), tx)
        .await
        .unwrap_err();
    assert!(matches!(err, choraleia::CoreError::Conflict(_)));
    token.cancel();
}
