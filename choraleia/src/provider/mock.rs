//! Scriptable provider for orchestrator and server tests: each call pops the
//! next scripted delta sequence.

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;

use config::LlmModelConfig;
use stream_chunk::{DeltaEvent, FinishReason};

use crate::message::ChatMessage;

use super::{ChatOptions, DeltaStream, LlmProvider, ProviderError, ToolSchema};

/// Replays scripted delta sequences; when scripts run out, answers with a
/// single "done" text turn. Records every request's messages for assertions.
pub struct MockProvider {
    scripts: Mutex<std::collections::VecDeque<Vec<DeltaEvent>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(scripts: Vec<Vec<DeltaEvent>>) -> Self {
        MockProvider {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Messages of each call made so far, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn stream_chat(
        &self,
        _model: &LlmModelConfig,
        messages: &[ChatMessage],
        _tools: Option<&[ToolSchema]>,
        _options: &ChatOptions,
    ) -> Result<DeltaStream, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| {
                vec![
                    DeltaEvent::Text("done".into()),
                    DeltaEvent::Finish {
                        reason: FinishReason::Stop,
                        usage: None,
                    },
                ]
            });
        Ok(futures_util::stream::iter(script.into_iter().map(Ok)).boxed())
    }
}

#[cfg(test)]
pub(crate) fn test_model() -> LlmModelConfig {
    serde_json::from_value(serde_json::json!({
        "id": "mock",
        "provider": "mock",
        "model": "mock-1",
        "base_url": "http://localhost:0",
        "limits": {"max_tokens": 4096, "context_window": 8000}
    }))
    .expect("static test model")
}
