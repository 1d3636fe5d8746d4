//! OpenAI-compatible chat completions (OpenAI, Groq, Mistral).

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

pub struct OpenAiCompatibleModel {
    provider: Provider,
    endpoint: String,
    model: String,
    api_key: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(
        provider: Provider,
        base_url: &str,
        model: &str,
        api_key: String,
        params: GenerationParams,
    ) -> Result<Self> {
        let client = http_client(params.timeout)?;
        Ok(Self {
            provider,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            params,
            client,
        })
    }

    /// o1 models reject `temperature` and take `max_completion_tokens`.
    fn is_reasoning_model(&self) -> bool {
        self.provider == Provider::OpenAI && self.model.starts_with("o1")
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "stream": stream,
        });
        if self.is_reasoning_model() {
            body["max_completion_tokens"] = json!(self.params.max_tokens);
        } else {
            body["temperature"] = json!(self.params.temperature);
            body["max_tokens"] = json!(self.params.max_tokens);
            if let Some(top_p) = self.params.top_p {
                body["top_p"] = json!(top_p);
            }
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        send_with_retry(self.provider.label(), self.params.max_retries, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
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
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/jpeg;base64,{}", data)},
                    }),
                })
                .collect(),
        ),
    };
    json!({"role": message.role.as_str(), "content": content})
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiCompatibleModel {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| RagError::Invocation(format!("invalid completion response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                RagError::Invocation("missing choices[0].message.content".to_string()).into()
            })
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
                if data == "[DONE]" {
                    break;
                }
                let chunk: StreamChunk = serde_json::from_str(data)
                    .map_err(|e| RagError::Invocation(format!("invalid stream event: {}", e)))?;
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield content;
                        }
                    }
                }
            }
        }))
    }
}
