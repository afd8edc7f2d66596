//! Idempotent conversation title generation: after the first assistant
//! reply on an untitled conversation, a one-shot non-streaming call asks for
//! a short title and updates the conversation out of band.

use std::sync::Arc;

use dashmap::DashSet;

use choraleia_store::Store;
use config::LlmModelConfig;

use crate::message::ChatMessage;
use crate::provider::{ChatOptions, LlmProvider};

const MAX_TITLE_WORDS: usize = 6;

/// Tracks conversations with a title job in flight or done, so jobs are
/// idempotent per conversation.
#[derive(Default)]
pub struct TitleJobs {
    seen: DashSet<String>,
}

impl TitleJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a title job unless one already ran for this conversation.
    pub fn spawn(
        self: &Arc<Self>,
        store: Arc<Store>,
        provider: Arc<dyn LlmProvider>,
        model: LlmModelConfig,
        conversation_id: String,
        user_text: String,
        assistant_text: String,
    ) {
        if !self.seen.insert(conversation_id.clone()) {
            return;
        }
        let jobs = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = run_title_job(
                &store,
                provider.as_ref(),
                &model,
                &conversation_id,
                &user_text,
                &assistant_text,
            )
            .await
            {
                tracing::warn!(conversation = %conversation_id, "title generation failed: {}", e);
                // Let a later finalize retry.
                jobs.seen.remove(&conversation_id);
            }
        });
    }
}

async fn run_title_job(
    store: &Store,
    provider: &dyn LlmProvider,
    model: &LlmModelConfig,
    conversation_id: &str,
    user_text: &str,
    assistant_text: &str,
) -> Result<(), crate::error::CoreError> {
    let prompt = vec![
        ChatMessage::system(
            "Produce a conversation title of at most six words. \
             Respond with the title only, no quotes, no punctuation at the end.",
        ),
        ChatMessage::user(format!(
            "User: {}\nAssistant: {}",
            truncate(user_text, 800),
            truncate(assistant_text, 800)
        )),
    ];
    let options = ChatOptions {
        max_tokens: Some(32),
        ..Default::default()
    };
    let raw = provider.complete(model, &prompt, &options).await?;
    let title = clamp_title(&raw);
    if title.is_empty() {
        return Ok(());
    }
    store.set_title_if_empty(conversation_id, &title).await?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// First line, stripped of quotes, clamped to the word budget.
pub fn clamp_title(raw: &str) -> String {
    let line = raw.lines().next().unwrap_or("").trim();
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    line.split_whitespace()
        .take(MAX_TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_title_limits_words_and_strips_quotes() {
        assert_eq!(
            clamp_title("\"Fixing the flaky integration test suite today\""),
            "Fixing the flaky integration test suite"
        );
        assert_eq!(clamp_title("Short title\nsecond line ignored"), "Short title");
        assert_eq!(clamp_title("  "), "");
    }
}
