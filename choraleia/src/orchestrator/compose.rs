//! Context composition: stored branch history to provider messages, system
//! prompt assembly, and hot-context blocks.

use choraleia_store::{Message, MessageRole, Workspace};
use stream_chunk::MessageChunk;

use crate::message::{ChatMessage, ToolCallRequest};
use crate::tools::BoundTool;

/// Hot-context blocks the caller attached to the request.
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct HotContext {
    #[serde(default)]
    pub attached_files: Vec<AttachedFile>,
    #[serde(default)]
    pub selected_codes: Vec<String>,
    #[serde(default)]
    pub git_commits: Vec<String>,
    #[serde(default)]
    pub code_change: Option<String>,
    #[serde(default)]
    pub other_context: Option<String>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct AttachedFile {
    pub path: String,
    pub content: String,
}

impl HotContext {
    pub fn is_empty(&self) -> bool {
        self.attached_files.is_empty()
            && self.selected_codes.is_empty()
            && self.git_commits.is_empty()
            && self.code_change.is_none()
            && self.other_context.is_none()
    }

    /// One user-side context block appended after the history.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.attached_files.is_empty() {
            out.push_str("## Attached files\n");
            for file in &self.attached_files {
                out.push_str(&format!("### {}\n```\n{}\n```\n", file.path, file.content));
            }
        }
        if !self.selected_codes.is_empty() {
            out.push_str("## Selected code\n");
            for code in &self.selected_codes {
                out.push_str(&format!("```\n{}\n```\n", code));
            }
        }
        if !self.git_commits.is_empty() {
            out.push_str("## Recent commits\n");
            for commit in &self.git_commits {
                out.push_str(&format!("- {}\n", commit));
            }
        }
        if let Some(change) = &self.code_change {
            out.push_str(&format!("## Pending change\n```\n{}\n```\n", change));
        }
        if let Some(other) = &self.other_context {
            out.push_str(&format!("## Context\n{}\n", other));
        }
        out
    }
}

/// System prompt: workspace description, asset and tool hints, policy
/// preamble.
pub fn build_system_prompt(
    workspace: Option<&Workspace>,
    asset_names: &[String],
    tools: &[BoundTool],
    supervisor: bool,
) -> String {
    let mut prompt = String::from(
        "You are the assistant of a multi-asset terminal platform. \
         Use the provided tools to inspect and modify files, run commands, \
         and reach remote assets; prefer tools over guessing. \
         Report tool failures honestly and recover when possible.",
    );
    if let Some(workspace) = workspace {
        prompt.push_str(&format!("\n\nWorkspace: {}", workspace.name));
        if let Some(description) = &workspace.description {
            prompt.push_str(&format!("\n{}", description));
        }
    }
    if !asset_names.is_empty() {
        prompt.push_str(&format!(
            "\nConnected assets: {}.",
            asset_names.join(", ")
        ));
    }
    if !tools.is_empty() {
        let ids: Vec<&str> = tools.iter().map(|t| t.tool.definition().id).collect();
        prompt.push_str(&format!("\nAvailable tools: {}.", ids.join(", ")));
    }
    if supervisor {
        prompt.push_str(
            "\nYou are the supervisor agent: delegate subtasks with transfer_to_agent \
             when a child agent fits better.",
        );
    }
    prompt
}

/// Expands one stored message into wire messages.
///
/// An assistant message whose chunk log interleaves several tool rounds is
/// split into alternating assistant(tool_calls) / tool segments, which is
/// the shape providers require.
pub fn message_to_chat(message: &Message) -> Vec<ChatMessage> {
    match message.role {
        MessageRole::User => vec![ChatMessage::user(content_of(message))],
        MessageRole::System => vec![ChatMessage::system(content_of(message))],
        MessageRole::Tool => vec![ChatMessage::tool_result("", content_of(message))],
        MessageRole::Assistant => assistant_to_chat(message),
    }
}

fn content_of(message: &Message) -> String {
    if !message.content.is_empty() {
        return message.content.clone();
    }
    stream_chunk::plain_text(&message.chunks)
}

struct Segment {
    text: String,
    calls: Vec<ToolCallRequest>,
    results: Vec<(String, String, bool)>,
}

impl Segment {
    fn new() -> Self {
        Segment {
            text: String::new(),
            calls: Vec::new(),
            results: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.calls.is_empty() && self.results.is_empty()
    }
}

fn assistant_to_chat(message: &Message) -> Vec<ChatMessage> {
    let mut segments: Vec<Segment> = vec![Segment::new()];
    for chunk in &message.chunks {
        let current_has_results = !segments.last().map(|s| s.results.is_empty()).unwrap_or(true);
        match chunk {
            // Reasoning traces stay out of replayed context.
            MessageChunk::Reasoning { .. } => {}
            MessageChunk::Media { .. } => {}
            MessageChunk::Text { text } => {
                if current_has_results {
                    segments.push(Segment::new());
                }
                if let Some(segment) = segments.last_mut() {
                    segment.text.push_str(text);
                }
            }
            MessageChunk::ToolCall {
                tool_call_id,
                tool_name,
                arguments,
            } => {
                if current_has_results {
                    segments.push(Segment::new());
                }
                if let Some(segment) = segments.last_mut() {
                    segment.calls.push(ToolCallRequest {
                        id: tool_call_id.clone(),
                        name: tool_name.clone(),
                        arguments: arguments.clone(),
                    });
                }
            }
            MessageChunk::ToolResult {
                tool_call_id,
                result,
                success,
            } => {
                if let Some(segment) = segments.last_mut() {
                    segment
                        .results
                        .push((tool_call_id.clone(), result.clone(), *success));
                }
            }
        }
    }

    let mut out = Vec::new();
    for segment in segments {
        if segment.is_empty() {
            continue;
        }
        if segment.calls.is_empty() {
            if !segment.text.is_empty() {
                out.push(ChatMessage::assistant(segment.text.clone()));
            }
        } else {
            let text = (!segment.text.is_empty()).then(|| segment.text.clone());
            out.push(ChatMessage::assistant_tool_calls(text, segment.calls));
        }
        for (call_id, result, success) in segment.results {
            let body = if success {
                result
            } else {
                format!("error: {}", result)
            };
            out.push(ChatMessage::tool_result(call_id, body));
        }
    }
    if out.is_empty() {
        out.push(ChatMessage::assistant(content_of(message)));
    }
    out
}
