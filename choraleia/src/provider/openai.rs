//! OpenAI-compatible adapter: chat completions over SSE with tool-call
//! deltas and `reasoning_content` passthrough.
//!
//! Usage arrives on a trailing chunk when `stream_options.include_usage` is
//! set, so the translator holds the finish reason until the stream's `[DONE]`
//! frame and emits one `Finish` event with both.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use config::LlmModelConfig;
use stream_chunk::{DeltaEvent, FinishReason, Usage};

use crate::message::{ChatMessage, ChatRole, ContentPart};

use super::{ChatOptions, DeltaStream, LlmProvider, ProviderError, ResponseFormat, ToolSchema};

pub struct OpenAiCompatProvider {
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new() -> Self {
        OpenAiCompatProvider {
            http: reqwest::Client::new(),
        }
    }

    fn request_body(
        model: &LlmModelConfig,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        options: &ChatOptions,
        stream: bool,
    ) -> WireRequest {
        WireRequest {
            model: model.model.clone(),
            messages: messages.iter().map(wire_message).collect(),
            stream,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: if options.stop.is_empty() {
                None
            } else {
                Some(options.stop.clone())
            },
            presence_penalty: options.presence_penalty,
            frequency_penalty: options.frequency_penalty,
            parallel_tool_calls: options.parallel_tool_calls,
            response_format: options.response_format.as_ref().map(|f| match f {
                ResponseFormat::Text => serde_json::json!({"type": "text"}),
                ResponseFormat::JsonObject => serde_json::json!({"type": "json_object"}),
                ResponseFormat::JsonSchema(schema) => {
                    serde_json::json!({"type": "json_schema", "json_schema": schema})
                }
            }),
            stream_options: (stream && options.include_usage)
                .then(|| serde_json::json!({"include_usage": true})),
            tools: tools.map(|ts| {
                ts.iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect()
            }),
        }
    }

    async fn post(
        &self,
        model: &LlmModelConfig,
        body: &WireRequest,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!(
            "{}/chat/completions",
            model.base_url.trim_end_matches('/')
        );
        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &model.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: extract_error_message(&message),
            });
        }
        Ok(response)
    }
}

impl Default for OpenAiCompatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn stream_chat(
        &self,
        model: &LlmModelConfig,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
        options: &ChatOptions,
    ) -> Result<DeltaStream, ProviderError> {
        let body = Self::request_body(model, messages, tools, options, true);
        let response = self.post(model, &body).await?;

        let mut pending_finish: Option<FinishReason> = None;
        let mut pending_usage: Option<Usage> = None;
        let mut done = false;

        let stream = response
            .bytes_stream()
            .eventsource()
            .flat_map(move |event| {
                let mut out: Vec<Result<DeltaEvent, ProviderError>> = Vec::new();
                if done {
                    return futures_util::stream::iter(out);
                }
                match event {
                    Err(e) => out.push(Err(ProviderError::Transport(e.to_string()))),
                    Ok(event) if event.data.trim() == "[DONE]" => {
                        done = true;
                        out.push(Ok(DeltaEvent::Finish {
                            reason: pending_finish.take().unwrap_or(FinishReason::Stop),
                            usage: pending_usage.take(),
                        }));
                    }
                    Ok(event) => match serde_json::from_str::<WireChunk>(&event.data) {
                        Err(e) => out.push(Err(ProviderError::Decode(format!(
                            "chunk parse: {} in {:?}",
                            e, event.data
                        )))),
                        Ok(chunk) => {
                            if let Some(usage) = chunk.usage {
                                pending_usage = Some(usage);
                            }
                            if let Some(choice) = chunk.choices.into_iter().next() {
                                if let Some(text) = choice.delta.content {
                                    if !text.is_empty() {
                                        out.push(Ok(DeltaEvent::Text(text)));
                                    }
                                }
                                if let Some(text) = choice.delta.reasoning_content {
                                    if !text.is_empty() {
                                        out.push(Ok(DeltaEvent::Reasoning(text)));
                                    }
                                }
                                for tc in choice.delta.tool_calls.unwrap_or_default() {
                                    out.push(Ok(DeltaEvent::ToolCallFragment {
                                        index: tc.index,
                                        id: tc.id,
                                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                                        arguments: tc
                                            .function
                                            .and_then(|f| f.arguments)
                                            .unwrap_or_default(),
                                    }));
                                }
                                if let Some(reason) = choice.finish_reason {
                                    pending_finish = Some(parse_finish_reason(&reason));
                                }
                            }
                        }
                    },
                }
                futures_util::stream::iter(out)
            });
        Ok(stream.boxed())
    }

    async fn complete(
        &self,
        model: &LlmModelConfig,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ProviderError> {
        let body = Self::request_body(model, messages, None, options, false);
        let response = self.post(model, &body).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

fn parse_finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Pulls `error.message` out of an OpenAI error envelope, falling back to
/// the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.chars().take(500).collect())
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

fn wire_message(msg: &ChatMessage) -> Value {
    let content: Value = if msg.parts.len() == 1 {
        if let ContentPart::Text { text } = &msg.parts[0] {
            Value::String(text.clone())
        } else {
            Value::Array(msg.parts.iter().map(wire_part).collect())
        }
    } else if msg.parts.is_empty() {
        Value::Null
    } else {
        Value::Array(msg.parts.iter().map(wire_part).collect())
    };

    let mut out = serde_json::json!({
        "role": msg.role.as_str(),
        "content": content,
    });
    if !msg.tool_calls.is_empty() {
        out["tool_calls"] = Value::Array(
            msg.tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {"name": c.name, "arguments": c.arguments},
                    })
                })
                .collect(),
        );
    }
    if msg.role == ChatRole::Tool {
        if let Some(id) = &msg.tool_call_id {
            out["tool_call_id"] = Value::String(id.clone());
        }
    }
    out
}

fn wire_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentPart::ImageUrl { url } => {
            serde_json::json!({"type": "image_url", "image_url": {"url": url}})
        }
        ContentPart::AudioUrl { url } => {
            serde_json::json!({"type": "audio_url", "audio_url": {"url": url}})
        }
        ContentPart::VideoUrl { url } => {
            serde_json::json!({"type": "video_url", "video_url": {"url": url}})
        }
        ContentPart::FileUrl { url } => {
            serde_json::json!({"type": "file_url", "file_url": {"url": url}})
        }
        ContentPart::InputAudio { data, format } => {
            serde_json::json!({"type": "input_audio", "input_audio": {"data": data, "format": format}})
        }
    }
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct WireChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunction>,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRequest;

    #[test]
    fn wire_message_plain_text_is_string_content() {
        let v = wire_message(&ChatMessage::user("hi"));
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hi");
    }

    #[test]
    fn wire_message_multimodal_is_part_array() {
        let msg = ChatMessage {
            role: ChatRole::User,
            parts: vec![
                ContentPart::Text { text: "look".into() },
                ContentPart::ImageUrl {
                    url: "data:image/png;base64,AA".into(),
                },
            ],
            tool_calls: Vec::new(),
            tool_call_id: None,
        };
        let v = wire_message(&msg);
        assert_eq!(v["content"][0]["type"], "text");
        assert_eq!(v["content"][1]["image_url"]["url"], "data:image/png;base64,AA");
    }

    #[test]
    fn wire_message_assistant_tool_calls() {
        let msg = ChatMessage::assistant_tool_calls(
            None,
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "fs_list".into(),
                arguments: "{\"path\":\"/\"}".into(),
            }],
        );
        let v = wire_message(&msg);
        assert_eq!(v["content"], Value::Null);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "fs_list");
    }

    #[test]
    fn wire_chunk_parses_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"fs_list","arguments":"{\"pa"}}]},"finish_reason":null}]}"#;
        let chunk: WireChunk = serde_json::from_str(data).unwrap();
        let tc = &chunk.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(tc.id.as_deref(), Some("call_1"));
        assert_eq!(
            tc.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"pa")
        );
    }

    #[test]
    fn error_envelope_message_is_extracted() {
        let body = r#"{"error": {"message": "model overloaded", "type": "server_error"}}"#;
        assert_eq!(extract_error_message(body), "model overloaded");
        assert_eq!(extract_error_message("plain"), "plain");
    }

    #[test]
    fn request_body_carries_options() {
        let model = crate::provider::mock::test_model();
        let options = ChatOptions {
            temperature: Some(0.2),
            parallel_tool_calls: Some(true),
            include_usage: true,
            response_format: Some(ResponseFormat::JsonObject),
            ..Default::default()
        };
        let body = OpenAiCompatProvider::request_body(
            &model,
            &[ChatMessage::user("x")],
            None,
            &options,
            true,
        );
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["stream"], true);
        assert_eq!(v["stream_options"]["include_usage"], true);
        assert_eq!(v["parallel_tool_calls"], true);
        assert_eq!(v["response_format"]["type"], "json_object");
        assert!(v.get("stop").is_none());
    }
}
