//! Chat completions endpoint: request parsing, conversation resolution, and
//! the SSE bridge from orchestrator events to OpenAI-compatible wire chunks.
//!
//! Pre-stream failures return the JSON error envelope; once the SSE channel
//! is open every failure is carried in-stream and the response still ends
//! with `data: [DONE]`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use choraleia::{Action, ChatOptions, HotContext, OrchestratorEvent, ResponseFormat, RunInput};
use config::find_model;
use stream_chunk::{ChatCompletionChunk, WireFunctionDelta, WireToolCallDelta};

use crate::error::ApiError;
use crate::AppState;

/// Events buffered toward a slow SSE client before it is declared gone
/// (~1 MiB at typical delta sizes).
const SSE_QUEUE_CAPACITY: usize = 4096;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<IncomingMessage>,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,

    // Conversation addressing extensions.
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    /// `new` | `edit` | `regenerate`; default `new`.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub supervisor: bool,

    // Sampling options, OpenAI names.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub response_format: Option<serde_json::Value>,

    #[serde(flatten)]
    pub hot_context: HotContext,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<IncomingContent>,
}

/// String or part-array content, both accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

impl IncomingContent {
    fn as_text(&self) -> String {
        match self {
            IncomingContent::Text(s) => s.clone(),
            IncomingContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

fn chat_options(request: &ChatCompletionRequest) -> Result<ChatOptions, ApiError> {
    let response_format = match &request.response_format {
        None => None,
        Some(v) => match v.get("type").and_then(|t| t.as_str()) {
            Some("text") | None => Some(ResponseFormat::Text),
            Some("json_object") => Some(ResponseFormat::JsonObject),
            Some("json_schema") => Some(ResponseFormat::JsonSchema(
                v.get("json_schema").cloned().unwrap_or_default(),
            )),
            Some(other) => {
                return Err(ApiError::bad_request(format!(
                    "unknown response_format type: {}",
                    other
                )))
            }
        },
    };
    Ok(ChatOptions {
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stop: request.stop.clone().unwrap_or_default(),
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        parallel_tool_calls: request.parallel_tool_calls,
        response_format,
        include_usage: request
            .stream_options
            .as_ref()
            .map(|o| o.include_usage)
            .unwrap_or(false),
    })
}

pub async fn completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let model = find_model(&state.models, &request.model)
        .cloned()
        .ok_or_else(|| ApiError::not_found(format!("unknown model: {}", request.model)))?;

    let action = match request.action.as_deref() {
        None => Action::New,
        Some(s) => Action::parse(s)
            .ok_or_else(|| ApiError::bad_request(format!("unknown action: {}", s)))?,
    };

    let user_text = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role.eq_ignore_ascii_case("user"))
        .and_then(|m| m.content.as_ref().map(|c| c.as_text()));
    if action != Action::Regenerate && user_text.is_none() {
        return Err(ApiError::bad_request("no user message in messages"));
    }
    if action == Action::Regenerate && request.source_id.is_none() {
        return Err(ApiError::bad_request("regenerate requires source_id"));
    }

    if let Some(workspace_id) = &request.workspace_id {
        state.store.get_workspace(workspace_id).await?;
    }
    let conversation = match &request.conversation_id {
        Some(id) => state.store.get_conversation(id).await?,
        None => {
            // Implicit creation on first completion.
            state
                .store
                .create_conversation(None, request.workspace_id.as_deref(), None, None)
                .await?
        }
    };

    let input = RunInput {
        conversation_id: conversation.id.clone(),
        workspace_id: request.workspace_id.clone().or(conversation.workspace_id.clone()),
        model: model.clone(),
        user_text,
        parent_id: request.parent_id.clone(),
        source_id: request.source_id.clone(),
        action,
        safe_mode: request.safe_mode,
        supervisor: request.supervisor,
        options: chat_options(&request)?,
        hot_context: request.hot_context,
    };

    if request.stream {
        stream_response(state, input, model.model.clone(), conversation.id).await
    } else {
        let (tx, _rx) = mpsc::channel(SSE_QUEUE_CAPACITY);
        let outcome = state.orchestrator.run(input, tx).await?;
        let body = serde_json::json!({
            "id": format!("chatcmpl-{}", outcome.assistant_message_id),
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": model.model,
            "conversation_id": outcome.conversation_id,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": outcome.content},
                "finish_reason": outcome.finish_reason.as_str(),
            }],
            "usage": outcome.usage,
        });
        Ok(Json(body).into_response())
    }
}

async fn stream_response(
    state: AppState,
    input: RunInput,
    model_name: String,
    conversation_id: String,
) -> Result<Response, ApiError> {
    // A concurrent stream on the same conversation gets a clean HTTP 409
    // instead of an empty SSE body.
    if state
        .orchestrator
        .cancels()
        .is_streaming(&conversation_id)
    {
        return Err(ApiError::conflict(format!(
            "conversation {} already has an active stream",
            conversation_id
        )));
    }

    let (tx, rx) = mpsc::channel::<OrchestratorEvent>(SSE_QUEUE_CAPACITY);
    let orchestrator = Arc::clone(&state.orchestrator);
    let run_conversation = conversation_id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(input, tx).await {
            tracing::warn!(conversation = %run_conversation, "completion run refused: {}", e);
        }
    });

    let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created = chrono::Utc::now().timestamp();
    let chunks = ReceiverStream::new(rx).map(move |event| {
        event_to_chunk(&stream_id, created, &model_name, &conversation_id, event)
    });
    let done = futures_util::stream::once(async { Some("[DONE]".to_string()) });
    let body = chunks
        .chain(done)
        .filter_map(|data| async move { data })
        .map(|data| Ok::<Event, std::convert::Infallible>(Event::default().data(data)));
    Ok(Sse::new(body).into_response())
}

/// Translates one orchestrator event into the JSON payload of one SSE
/// frame. Returns None for events with no wire representation.
fn event_to_chunk(
    id: &str,
    created: i64,
    model: &str,
    conversation_id: &str,
    event: OrchestratorEvent,
) -> Option<String> {
    let conv = Some(conversation_id);
    let chunk = match event {
        OrchestratorEvent::Role => ChatCompletionChunk::role(id, created, model, conv),
        OrchestratorEvent::Text(text) => {
            ChatCompletionChunk::text(id, created, model, conv, &text)
        }
        OrchestratorEvent::Reasoning(text) => {
            ChatCompletionChunk::reasoning(id, created, model, conv, &text)
        }
        OrchestratorEvent::ToolCallDelta {
            index,
            id: call_id,
            name,
            arguments,
        } => ChatCompletionChunk::tool_call(
            id,
            created,
            model,
            conv,
            WireToolCallDelta {
                index,
                id: call_id,
                kind: "function",
                function: WireFunctionDelta {
                    name,
                    arguments: (!arguments.is_empty()).then_some(arguments),
                },
            },
        ),
        OrchestratorEvent::ToolResult {
            tool_call_id,
            tool_name,
            result,
            success,
        } => {
            // Tool results ride as an assistant delta with a tool-result
            // content part; the UI folds call + result into one block.
            let payload = serde_json::json!({
                "id": id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "conversation_id": conversation_id,
                "choices": [{
                    "index": 0,
                    "delta": {
                        "role": "tool",
                        "tool_call_id": tool_call_id,
                        "name": tool_name,
                        "content": result,
                        "success": success,
                    }
                }]
            });
            return Some(payload.to_string());
        }
        OrchestratorEvent::Finish { reason, usage } => {
            ChatCompletionChunk::finish(id, created, model, conv, reason, usage)
        }
    };
    // axum's Event adds the `data: ` framing; only the JSON goes here.
    serde_json::to_string(&chunk).ok()
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub conversation_id: String,
}

/// `POST /api/v1/chat/cancel`: 204 when a stream was cancelled, 404 when no
/// stream is active. Cancelling twice behaves like cancelling once.
pub async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> Result<Response, ApiError> {
    if state
        .orchestrator
        .cancels()
        .cancel(&request.conversation_id)
    {
        Ok(axum::http::StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ApiError::not_found(format!(
            "no active stream for conversation {}",
            request.conversation_id
        )))
    }
}

pub async fn status(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<serde_json::Value> {
    let is_streaming = state.orchestrator.cancels().is_streaming(&conversation_id);
    Json(serde_json::json!({
        "conversation_id": conversation_id,
        "is_streaming": is_streaming,
    }))
}
