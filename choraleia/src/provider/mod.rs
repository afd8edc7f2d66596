//! LLM provider contract: one capability, `stream_chat`, yielding a finite,
//! non-restartable sequence of delta events. Vendors plug in behind this
//! trait; the bundled [`OpenAiCompatProvider`] covers the OpenAI-compatible
//! wire family and [`MockProvider`] drives tests.

pub(crate) mod mock;
mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;

use config::LlmModelConfig;
use stream_chunk::DeltaEvent;

use crate::message::ChatMessage;

pub use mock::MockProvider;
pub use openai::OpenAiCompatProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
}

/// Finite stream of deltas; the last item is a `Finish` event or an error.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<DeltaEvent, ProviderError>> + Send>>;

/// Response format request, OpenAI `response_format` shaped.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema(Value),
}

/// Sampling and protocol options for one chat call.
#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// Allow the model to emit multiple tool calls in one turn.
    pub parallel_tool_calls: Option<bool>,
    pub response_format: Option<ResponseFormat>,
    /// `stream_options.include_usage`.
    pub include_usage: bool,
}

/// Tool schema presented to the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Opens a streaming chat call. The stream is finite and cannot be
    /// restarted; dropping it closes the underlying connection.
    async fn stream_chat(
        &self,
        model: &LlmModelConfig,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        options: &ChatOptions,
    ) -> Result<DeltaStream, ProviderError>;

    /// One-shot non-streaming completion; used for secondary jobs such as
    /// title generation. Default drains `stream_chat` and concatenates text.
    async fn complete(
        &self,
        model: &LlmModelConfig,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        use futures_util::StreamExt;
        let mut stream = self.stream_chat(model, messages, None, options).await?;
        let mut out = String::new();
        while let Some(event) = stream.next().await {
            if let DeltaEvent::Text(t) = event? {
                out.push_str(&t);
            }
        }
        Ok(out)
    }
}
