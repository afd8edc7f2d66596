//! The chunk sum type: one typed, ordered unit of a message's content.
//!
//! Serialized as a JSON array column on each message, so the variants form a
//! closed set. Readers may merge adjacent text (or adjacent reasoning) chunks
//! without semantic change; [`merge_adjacent`] implements that normalization.

use serde::{Deserialize, Serialize};

/// MIME class of a media chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

/// One ordered unit within a message.
///
/// Every `tool_call` chunk on a message that terminates in `completed` is
/// eventually followed by a `tool_result` chunk with the same `tool_call_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageChunk {
    /// User-visible output text.
    Text { text: String },
    /// Thinking trace, rendered collapsibly by the UI.
    Reasoning { text: String },
    /// A tool invocation requested by the model. `arguments` is JSON text;
    /// while streaming it may be assembled from fragments.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        arguments: String,
    },
    /// Outcome of a tool invocation, keyed back by `tool_call_id`.
    ToolResult {
        tool_call_id: String,
        result: String,
        success: bool,
    },
    /// URL or data-URI media reference.
    Media { url: String, kind: MediaKind },
}

impl MessageChunk {
    pub fn text(text: impl Into<String>) -> Self {
        MessageChunk::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        MessageChunk::Reasoning { text: text.into() }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        result: impl Into<String>,
        success: bool,
    ) -> Self {
        MessageChunk::ToolResult {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            success,
        }
    }
}

/// Merges runs of adjacent `Text` chunks and runs of adjacent `Reasoning`
/// chunks. Other variants pass through unchanged, order preserved.
pub fn merge_adjacent(chunks: &[MessageChunk]) -> Vec<MessageChunk> {
    let mut out: Vec<MessageChunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match (out.last_mut(), chunk) {
            (Some(MessageChunk::Text { text: prev }), MessageChunk::Text { text }) => {
                prev.push_str(text);
            }
            (Some(MessageChunk::Reasoning { text: prev }), MessageChunk::Reasoning { text }) => {
                prev.push_str(text);
            }
            _ => out.push(chunk.clone()),
        }
    }
    out
}

/// Concatenation of all `Text` chunks: the plain-text content view stored on
/// finalize and used by listing endpoints.
pub fn plain_text(chunks: &[MessageChunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if let MessageChunk::Text { text } = chunk {
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serde_is_tagged_by_type() {
        let chunk = MessageChunk::tool_result("call_1", "ok", true);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_call_id"], "call_1");
        let back: MessageChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn merge_adjacent_joins_text_runs_only() {
        let chunks = vec![
            MessageChunk::text("a"),
            MessageChunk::text("b"),
            MessageChunk::reasoning("r1"),
            MessageChunk::reasoning("r2"),
            MessageChunk::text("c"),
        ];
        let merged = merge_adjacent(&chunks);
        assert_eq!(
            merged,
            vec![
                MessageChunk::text("ab"),
                MessageChunk::reasoning("r1r2"),
                MessageChunk::text("c"),
            ]
        );
    }

    #[test]
    fn merge_does_not_cross_tool_chunks() {
        let chunks = vec![
            MessageChunk::text("a"),
            MessageChunk::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "fs_list".into(),
                arguments: "{}".into(),
            },
            MessageChunk::text("b"),
        ];
        assert_eq!(merge_adjacent(&chunks).len(), 3);
    }

    #[test]
    fn plain_text_skips_non_text_chunks() {
        let chunks = vec![
            MessageChunk::reasoning("thinking"),
            MessageChunk::text("hello "),
            MessageChunk::tool_result("c1", "out", true),
            MessageChunk::text("world"),
        ];
        assert_eq!(plain_text(&chunks), "hello world");
    }

    #[test]
    fn serde_roundtrip_is_identity_for_a_chunk_list() {
        let chunks = vec![
            MessageChunk::text("hi"),
            MessageChunk::Media {
                url: "data:image/png;base64,AAAA".into(),
                kind: MediaKind::Image,
            },
        ];
        let json = serde_json::to_string(&chunks).unwrap();
        let back: Vec<MessageChunk> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunks);
    }
}
