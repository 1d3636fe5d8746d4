//! Ollama `/api/chat` client. Streaming responses are newline-delimited JSON
//! objects ending with `"done": true`.

use anyhow::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    body_lines, boxed, http_client, send_with_retry, ChatModel, GenerationParams, PromptMessage,
    TextStream,
};
use crate::catalog::Provider;
use crate::error::RagError;

pub struct OllamaModel {
    endpoint: String,
    model: String,
    params: GenerationParams,
    client: reqwest::Client,
}

impl OllamaModel {
    /// `base_url` is the server root, e.g. `http://localhost:11434`.
    pub fn new(base_url: &str, model: &str, params: GenerationParams) -> Result<Self> {
        let client = http_client(params.timeout)?;
        Ok(Self {
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            params,
            client,
        })
    }

    fn request_body(&self, messages: &[PromptMessage], stream: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let mut msg = json!({"role": m.role.as_str(), "content": m.text_content()});
                let images = m.images();
                if !images.is_empty() {
                    msg["images"] = json!(images);
                }
                msg
            })
            .collect();
        json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
            "options": {
                "temperature": self.params.temperature,
                "num_predict": self.params.max_tokens,
            },
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        send_with_retry("Ollama", self.params.max_retries, || {
            self.client.post(&self.endpoint).json(body)
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::Invocation(format!("invalid Ollama response: {}", e)))?;
        if let Some(error) = parsed.error {
            return Err(RagError::Invocation(error).into());
        }
        parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| RagError::Invocation("missing message in Ollama response".into()).into())
    }

    async fn stream(&self, messages: &[PromptMessage]) -> Result<TextStream> {
        let body = self.request_body(messages, true);
        let response = self.send(&body).await?;
        let mut lines = body_lines(response);

        Ok(boxed(try_stream! {
            while let Some(line) = lines.next().await {
                let line = line?;
                let parsed: ChatResponse = serde_json::from_str(&line)
                    .map_err(|e| RagError::Invocation(format!("invalid stream line: {}", e)))?;
                if let Some(error) = parsed.error {
                    Err::<(), _>(RagError::Invocation(error))?;
                }
                if let Some(message) = parsed.message {
                    if !message.content.is_empty() {
                        yield message.content;
                    }
                }
                if parsed.done {
                    break;
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use httpmock::prelude::*;

    fn model(server: &MockServer, id: &str) -> OllamaModel {
        let mut params = GenerationParams::from_config(&LlmConfig::default());
        params.max_retries = 0;
        OllamaModel::new(&server.base_url(), id, params).unwrap()
    }

    #[tokio::test]
    async fn stream_stops_at_done() {
        let server = MockServer::start();
        let ndjson = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hi\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\" there\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        server.mock(|when, then| {
            when.method(POST).path("/api/chat");
            then.status(200).body(ndjson);
        });

        let mut stream = model(&server, "llama3.2")
            .stream(&[PromptMessage::user("hello")])
            .await
            .unwrap();
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta.unwrap());
        }
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn images_ride_in_images_field() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/chat")
                .json_body_partial(r#"{"messages":[{"role":"user","content":"describe","images":["QUJD"]}]}"#);
            then.status(200)
                .json_body(json!({"message": {"role": "assistant", "content": "a cat"}, "done": true}));
        });

        let description = model(&server, "llava")
            .describe_image("QUJD", "describe")
            .await
            .unwrap();
        mock.assert();
        assert_eq!(description, "a cat");
    }
}
