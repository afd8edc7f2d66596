//! OpenAI-compatible `chat.completion.chunk` DTOs for the SSE channel.
//!
//! Field names match the OpenAI streaming wire format, plus a
//! `conversation_id` extension so clients can correlate implicit
//! conversations. One chunk serializes to one `data: <json>\n\n` frame.

use serde::Serialize;

use crate::delta::{FinishReason, Usage};

/// Stream terminator frame.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One streamed completion chunk.
#[derive(Clone, Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub choices: Vec<ChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCallDelta>>,
}

/// One tool-call fragment on the wire; `index` associates fragments.
#[derive(Clone, Debug, Serialize)]
pub struct WireToolCallDelta {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionDelta,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct WireFunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ChatCompletionChunk {
    fn base(id: &str, created: i64, model: &str, conversation_id: Option<&str>) -> Self {
        ChatCompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            conversation_id: conversation_id.map(str::to_string),
            choices: Vec::new(),
            usage: None,
        }
    }

    /// First chunk of a stream: announces the assistant role.
    pub fn role(id: &str, created: i64, model: &str, conversation_id: Option<&str>) -> Self {
        let mut chunk = Self::base(id, created, model, conversation_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                role: Some("assistant"),
                ..Default::default()
            },
            finish_reason: None,
        });
        chunk
    }

    pub fn text(
        id: &str,
        created: i64,
        model: &str,
        conversation_id: Option<&str>,
        content: &str,
    ) -> Self {
        let mut chunk = Self::base(id, created, model, conversation_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                content: Some(content.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        });
        chunk
    }

    pub fn reasoning(
        id: &str,
        created: i64,
        model: &str,
        conversation_id: Option<&str>,
        content: &str,
    ) -> Self {
        let mut chunk = Self::base(id, created, model, conversation_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                reasoning_content: Some(content.to_string()),
                ..Default::default()
            },
            finish_reason: None,
        });
        chunk
    }

    pub fn tool_call(
        id: &str,
        created: i64,
        model: &str,
        conversation_id: Option<&str>,
        delta: WireToolCallDelta,
    ) -> Self {
        let mut chunk = Self::base(id, created, model, conversation_id);
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta {
                tool_calls: Some(vec![delta]),
                ..Default::default()
            },
            finish_reason: None,
        });
        chunk
    }

    /// Final chunk: carries the finish reason and optional usage.
    pub fn finish(
        id: &str,
        created: i64,
        model: &str,
        conversation_id: Option<&str>,
        reason: FinishReason,
        usage: Option<Usage>,
    ) -> Self {
        let mut chunk = Self::base(id, created, model, conversation_id);
        chunk.usage = usage;
        chunk.choices.push(ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some(reason.as_str()),
        });
        chunk
    }

    /// Serializes as one SSE frame: `data: <json>\n\n`.
    pub fn sse_data(&self) -> String {
        // Serialize cannot fail: all fields are strings/numbers.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {}\n\n", json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_chunk_has_assistant_delta_and_no_finish() {
        let chunk = ChatCompletionChunk::role("c1", 1, "m", Some("conv"));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["conversation_id"], "conv");
        assert_eq!(json["choices"][0]["delta"]["role"], "assistant");
        assert!(json["choices"][0].get("finish_reason").is_none());
    }

    #[test]
    fn finish_chunk_carries_reason_and_usage() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let chunk =
            ChatCompletionChunk::finish("c1", 1, "m", None, FinishReason::Stop, Some(usage));
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["usage"]["total_tokens"], 15);
        assert!(json.get("conversation_id").is_none());
    }

    #[test]
    fn sse_data_is_one_frame() {
        let chunk = ChatCompletionChunk::text("c1", 1, "m", None, "hi");
        let frame = chunk.sse_data();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn tool_call_delta_omits_absent_fields() {
        let delta = WireToolCallDelta {
            index: 0,
            id: None,
            kind: "function",
            function: WireFunctionDelta {
                name: None,
                arguments: Some("{\"pa".into()),
            },
        };
        let chunk = ChatCompletionChunk::tool_call("c1", 1, "m", None, delta);
        let json = serde_json::to_value(&chunk).unwrap();
        let tc = &json["choices"][0]["delta"]["tool_calls"][0];
        assert!(tc.get("id").is_none());
        assert_eq!(tc["function"]["arguments"], "{\"pa");
    }
}
