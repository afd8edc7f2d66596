//! In-flight stream sessions: the event shape shared with the stream
//! router, and the process-wide cancel registry keyed by conversation id.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use stream_chunk::{FinishReason, Usage};

use crate::error::CoreError;

/// One observable event from a running stream session. The router translates
/// these into OpenAI-compatible wire chunks; order mirrors chunk-append
/// order exactly.
#[derive(Clone, Debug)]
pub enum OrchestratorEvent {
    /// Stream opened; the first wire chunk announces the assistant role.
    Role,
    Text(String),
    Reasoning(String),
    /// Streaming tool-call fragment, forwarded as it arrives.
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// A completed tool invocation's outcome.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: String,
        success: bool,
    },
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

/// Cancel functions for active streams, one per conversation. The router's
/// cancel and status endpoints share this registry with the orchestrator.
#[derive(Default)]
pub struct CancelRegistry {
    inner: DashMap<String, CancellationToken>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the conversation for a new stream. A second concurrent stream
    /// on the same conversation is a conflict.
    pub fn begin(&self, conversation_id: &str) -> Result<CancellationToken, CoreError> {
        let token = CancellationToken::new();
        match self.inner.entry(conversation_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CoreError::Conflict(format!(
                "conversation {} already has an active stream",
                conversation_id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
                Ok(token)
            }
        }
    }

    /// Fires the cancel signal. Returns false when no stream is active;
    /// cancelling twice is indistinguishable from cancelling once.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.inner.get(conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.inner.contains_key(conversation_id)
    }

    /// Releases the registry entry at stream end.
    pub fn finish(&self, conversation_id: &str) {
        self.inner.remove(conversation_id);
    }
}
