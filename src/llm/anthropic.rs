//! Anthropic Messages API.
//!
//! System messages are lifted into the top-level `system` field; the
//! remaining turns are sent as `messages`.

use anyhow::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    body_lines, boxed, http_client, send_with_retry, sse_data, ChatModel, Content,
    GenerationParams, Part, PromptMessage, TextStream,
};
use crate::catalog::Provider;
use crate::error::RagError;
use crate::models::Role;

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicModel {
    endpoint: String,
    model: String,
    api_key: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl AnthropicModel {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        params: GenerationParams,
    ) -> Result<Self> {
        let client = http_client(params.timeout)?;
        Ok(Self {
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            params,
            client,
        })
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> Value {
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(message_json)
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(top_p) = self.params.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(top_k) = self.params.top_k {
            body["top_k"] = json!(top_k);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        send_with_retry("Anthropic", self.params.max_retries, || {
            self.client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(body)
        })
        .await
    }
}

fn message_json(message: &PromptMessage) -> Value {
    let content = match &message.content {
        Content::Text(text) => json!(text),
        Content::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    Part::Text(text) => json!({"type": "text", "text": text}),
                    Part::JpegBase64(data) => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": "image/jpeg", "data": data},
                    }),
                })
                .collect(),
        ),
    };
    json!({"role": message.role.as_str(), "content": content})
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;
        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| RagError::Invocation(format!("invalid messages response: {}", e)))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        Ok(text)
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TextStream> {
        let body = self.request_body(messages, true);
        let response = self.send(&body).await?;
        let mut lines = body_lines(response);

        Ok(boxed(try_stream! {
            while let Some(line) = lines.next().await {
                let line = line?;
                let Some(data) = sse_data(&line) else {
                    continue;
                };
                let event: StreamEvent = serde_json::from_str(data)
                    .map_err(|e| RagError::Invocation(format!("invalid stream event: {}", e)))?;
                match event.kind.as_str() {
                    "content_block_delta" => {
                        if let Some(text) = event.delta.and_then(|d| d.text) {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                    }
                    "message_stop" => break,
                    "error" => {
                        Err::<(), _>(RagError::Invocation(format!(
                            "stream error: {}",
                            event.error.unwrap_or(Value::Null)
                        )))?;
                    }
                    _ => {}
                }
            }
        }))
    }
}
