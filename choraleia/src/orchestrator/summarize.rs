//! Deterministic summarization policy.
//!
//! Fires when the estimated prompt exceeds 0.8 of the model's context
//! window: the oldest messages up to a sliding midpoint are replaced by one
//! synthetic assistant message carrying a terse summary with key topics and
//! decisions, and the originals are retained as a compression snapshot. At
//! least the last eight messages always stay verbatim, and the synthetic
//! summary never re-enters summarization input.

use std::sync::Arc;

use choraleia_store::{Message, Store};
use config::LlmModelConfig;

use crate::message::ChatMessage;
use crate::provider::{ChatOptions, LlmProvider};

use super::compose::message_to_chat;

const CONTEXT_FILL_THRESHOLD: f32 = 0.8;
const KEEP_VERBATIM: usize = 8;
/// chars-per-token heuristic for budgeting; deliberately rough.
const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.approx_chars()).sum();
    (chars / CHARS_PER_TOKEN) as u32
}

/// Splits history into (to_summarize, keep) per the midpoint rule, or None
/// when summarization must not fire.
pub fn split_for_summary(history: &[Message]) -> Option<(usize, usize)> {
    if history.len() <= KEEP_VERBATIM {
        return None;
    }
    let midpoint = (history.len() / 2).min(history.len() - KEEP_VERBATIM);
    (midpoint > 0).then_some((0, midpoint))
}

/// Applies the policy: when the composed history would overflow, summarize
/// the oldest half (snapshotting originals) and return the shortened
/// message list. Fires at most once per turn.
pub async fn maybe_summarize(
    store: &Store,
    provider: &Arc<dyn LlmProvider>,
    model: &LlmModelConfig,
    conversation_id: &str,
    history: Vec<Message>,
) -> Vec<Message> {
    let composed: Vec<ChatMessage> = history.iter().flat_map(message_to_chat).collect();
    let budget = (model.limits.context_window as f32 * CONTEXT_FILL_THRESHOLD) as u32;
    if estimate_tokens(&composed) <= budget {
        return history;
    }
    // Prior synthetic summaries never re-enter summarization input.
    let offset = history.iter().take_while(|m| is_synthetic_summary(m)).count();
    let Some((start, end)) = split_for_summary(&history[offset..]) else {
        return history;
    };
    let (start, end) = (offset + start, offset + end);

    let old = &history[start..end];
    let summary_text = match summarize_messages(provider, model, old).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(conversation = %conversation_id, "summarization call failed: {}", e);
            return history;
        }
    };
    if let Err(e) = store
        .insert_compression_snapshot(conversation_id, &summary_text, old)
        .await
    {
        tracing::warn!(conversation = %conversation_id, "snapshot persist failed: {}", e);
        return history;
    }

    let mut shortened = Vec::with_capacity(history.len() - (end - start) + 1);
    shortened.extend_from_slice(&history[..start]);
    shortened.push(synthetic_summary(conversation_id, &summary_text));
    shortened.extend_from_slice(&history[end..]);
    tracing::debug!(
        conversation = %conversation_id,
        replaced = end - start,
        "history compressed"
    );
    shortened
}

/// The in-memory synthetic message. Marked by `finish_reason` so policy code
/// can recognize and skip it; it is never persisted into the message tree.
pub fn synthetic_summary(conversation_id: &str, summary: &str) -> Message {
    Message {
        id: format!("summary-{}", uuid::Uuid::new_v4()),
        conversation_id: conversation_id.to_string(),
        role: choraleia_store::MessageRole::Assistant,
        parent_id: None,
        source_id: None,
        status: choraleia_store::MessageStatus::Completed,
        finish_reason: Some("compression_summary".to_string()),
        content: summary.to_string(),
        chunks: vec![stream_chunk::MessageChunk::text(summary)],
        usage: None,
        created_at_ms: 0,
    }
}

pub fn is_synthetic_summary(message: &Message) -> bool {
    message.finish_reason.as_deref() == Some("compression_summary")
}

async fn summarize_messages(
    provider: &Arc<dyn LlmProvider>,
    model: &LlmModelConfig,
    messages: &[Message],
) -> Result<String, crate::provider::ProviderError> {
    let mut transcript = String::new();
    for message in messages {
        transcript.push_str(&format!(
            "{}: {}\n",
            message.role.as_str(),
            message.content
        ));
    }
    let prompt = vec![
        ChatMessage::system(
            "Compress the conversation below. Respond with: a terse summary paragraph, \
             a 'Key topics:' bullet list, and a 'Key decisions:' bullet list. No preamble.",
        ),
        ChatMessage::user(transcript),
    ];
    let options = ChatOptions {
        max_tokens: Some(512),
        ..Default::default()
    };
    provider.complete(model, &prompt, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use choraleia_store::{MessageRole, MessageStatus};

    fn message(i: usize, content: &str) -> Message {
        Message {
            id: format!("m{}", i),
            conversation_id: "c1".into(),
            role: if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            },
            parent_id: (i > 0).then(|| format!("m{}", i - 1)),
            source_id: None,
            status: MessageStatus::Completed,
            finish_reason: None,
            content: content.to_string(),
            chunks: vec![stream_chunk::MessageChunk::text(content)],
            usage: None,
            created_at_ms: i as i64,
        }
    }

    #[test]
    fn estimate_uses_chars_over_four() {
        let messages = vec![ChatMessage::user("a".repeat(400))];
        assert_eq!(estimate_tokens(&messages), 100);
    }

    #[test]
    fn split_keeps_last_eight_verbatim() {
        let history: Vec<Message> = (0..20).map(|i| message(i, "x")).collect();
        let (start, end) = split_for_summary(&history).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 10);

        let short: Vec<Message> = (0..8).map(|i| message(i, "x")).collect();
        assert!(split_for_summary(&short).is_none());

        // 10 messages: midpoint capped so 8 stay verbatim.
        let ten: Vec<Message> = (0..10).map(|i| message(i, "x")).collect();
        let (_, end) = split_for_summary(&ten).unwrap();
        assert_eq!(end, 2);
    }

    #[test]
    fn synthetic_summary_is_marked() {
        let summary = synthetic_summary("c1", "things happened");
        assert!(is_synthetic_summary(&summary));
        assert!(!is_synthetic_summary(&message(0, "x")));
    }
}
