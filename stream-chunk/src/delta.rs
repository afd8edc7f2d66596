//! Provider delta events: what a streaming chat call yields while it runs.
//!
//! The sequence is finite and not restartable. A `Finish` delta (or an error
//! from the stream) is always the last item.

use serde::{Deserialize, Serialize};

/// Why a turn ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Cancelled,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Error => "error",
            FinishReason::Cancelled => "cancelled",
        }
    }
}

/// Token usage reported by the provider for one call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One event from a provider stream.
///
/// Tool-call fragments carry an `index` so a reassembler can associate
/// fragments of the same call across deltas; `id` and `name` arrive on the
/// first fragment of a call, later fragments extend `arguments` only.
#[derive(Clone, Debug, PartialEq)]
pub enum DeltaEvent {
    Text(String),
    Reasoning(String),
    ToolCallFragment {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FinishReason::ToolCalls).unwrap();
        assert_eq!(json, "\"tool_calls\"");
        assert_eq!(FinishReason::ContentFilter.as_str(), "content_filter");
    }
}
