//! Canonical in-process chat message shape, provider-agnostic.
//!
//! Content is structured parts so multimodal input survives adapter
//! translation; adapters map these to their wire format.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// One part of a message's content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    AudioUrl { url: String },
    VideoUrl { url: String },
    FileUrl { url: String },
    /// Raw audio: base64 data plus format tag (e.g. "wav", "mp3").
    InputAudio { data: String, format: String },
}

/// A completed tool call carried on an assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON text as emitted by the model.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub parts: Vec<ContentPart>,
    /// Tool calls issued by this assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on `tool` role messages: which call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text_message(role: ChatRole, text: impl Into<String>) -> Self {
        ChatMessage {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(ChatRole::Assistant, text)
    }

    pub fn assistant_tool_calls(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        ChatMessage {
            role: ChatRole::Assistant,
            parts: text
                .into_iter()
                .map(|t| ContentPart::Text { text: t })
                .collect(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        ChatMessage {
            role: ChatRole::Tool,
            parts: vec![ContentPart::Text { text: text.into() }],
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Concatenated text parts; non-text parts are skipped.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Rough size for context budgeting: chars across all parts.
    pub fn approx_chars(&self) -> usize {
        self.parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::ImageUrl { url }
                | ContentPart::AudioUrl { url }
                | ContentPart::VideoUrl { url }
                | ContentPart::FileUrl { url } => url.len(),
                ContentPart::InputAudio { data, .. } => data.len(),
            })
            .sum::<usize>()
            + self
                .tool_calls
                .iter()
                .map(|c| c.name.len() + c.arguments.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_text_parts_only() {
        let msg = ChatMessage {
            role: ChatRole::User,
            parts: vec![
                ContentPart::Text { text: "see ".into() },
                ContentPart::ImageUrl {
                    url: "https://x/img.png".into(),
                },
                ContentPart::Text { text: "this".into() },
            ],
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        assert_eq!(msg.text(), "see this");
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = ChatMessage::tool_result("call_9", "ok");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
    }
}
