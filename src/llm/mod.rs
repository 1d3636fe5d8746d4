//! Chat model clients and the factory that builds them.
//!
//! Every provider implements [`ChatModel`]. [`create_chat_model`] and
//! [`create_vision_model`] resolve a catalog display name, obtain the API key
//! (environment, then [`SecretPrompt`]) and build the matching client:
//!
//! | Provider | Client |
//! |----------|--------|
//! | OpenAI, Groq, Mistral | [`openai::OpenAiCompatibleModel`] (`/chat/completions`, SSE) |
//! | Anthropic | [`anthropic::AnthropicModel`] (`/messages`, SSE) |
//! | Ollama | [`ollama::OllamaModel`] (`/api/chat`, NDJSON) |
//!
//! # Retry Strategy
//!
//! Requests are retried up to `llm.max_retries` times:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - other HTTP 4xx → fail immediately
//! - network errors → retry

pub mod anthropic;
pub mod ollama;
pub mod openai;

use anyhow::Result;
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{self, Provider};
use crate::config::LlmConfig;
use crate::credentials::{resolve_secret, SecretPrompt};
use crate::error::RagError;
use crate::models::Role;

/// Incremental text deltas from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A message as sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    Parts(Vec<Part>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    /// Base64-encoded JPEG bytes.
    JpegBase64(String),
}

impl PromptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
        }
    }

    /// A user message carrying an instruction and one JPEG image.
    pub fn user_with_image(instruction: impl Into<String>, jpeg_base64: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(vec![
                Part::Text(instruction.into()),
                Part::JpegBase64(jpeg_base64.into()),
            ]),
        }
    }

    /// Concatenated text parts; images are omitted.
    pub fn text_content(&self) -> String {
        match &self.content {
            Content::Text(t) => t.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text(t) => Some(t.as_str()),
                    Part::JpegBase64(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Base64 images attached to this message.
    pub fn images(&self) -> Vec<&str> {
        match &self.content {
            Content::Text(_) => Vec::new(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Part::JpegBase64(b) => Some(b.as_str()),
                    Part::Text(_) => None,
                })
                .collect(),
        }
    }
}

/// A configured chat (or vision) model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn provider(&self) -> Provider;

    fn model_id(&self) -> &str;

    /// One full completion.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String>;

    /// Streams the completion as text deltas.
    async fn stream(&self, messages: &[PromptMessage]) -> Result<TextStream> {
        let text = self.complete(messages).await?;
        Ok(boxed(futures::stream::once(async move {
            Ok::<_, anyhow::Error>(text)
        })))
    }

    /// Asks the model to describe a JPEG image.
    async fn describe_image(&self, jpeg_base64: &str, instruction: &str) -> Result<String> {
        let messages = [PromptMessage::user_with_image(instruction, jpeg_base64)];
        self.complete(&messages).await
    }
}

/// Sampling and transport settings shared by the clients.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl GenerationParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: None,
            top_k: None,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn for_provider(config: &LlmConfig, provider: Provider) -> Self {
        let mut params = Self::from_config(config);
        match provider {
            Provider::Anthropic => {
                params.top_p = Some(0.9);
                params.top_k = Some(40);
            }
            Provider::Mistral => params.top_p = Some(0.9),
            _ => {}
        }
        params
    }
}

/// Builds the chat model `display_name` from `provider`'s catalog.
pub fn create_chat_model(
    provider: Provider,
    display_name: &str,
    config: &LlmConfig,
    prompt: &dyn SecretPrompt,
) -> Result<Arc<dyn ChatModel>> {
    let model_id = catalog::resolve_chat_model(provider, display_name)?;
    build_model(provider, model_id, config, prompt)
}

/// Builds the vision model `display_name` from `provider`'s vision catalog.
pub fn create_vision_model(
    provider: Provider,
    display_name: &str,
    config: &LlmConfig,
    prompt: &dyn SecretPrompt,
) -> Result<Arc<dyn ChatModel>> {
    let model_id = catalog::resolve_vision_model(provider, display_name)?;
    build_model(provider, model_id, config, prompt)
}

fn build_model(
    provider: Provider,
    model_id: &str,
    config: &LlmConfig,
    prompt: &dyn SecretPrompt,
) -> Result<Arc<dyn ChatModel>> {
    let params = GenerationParams::for_provider(config, provider);
    let api_key = match provider.api_key_var() {
        Some(var) => Some(resolve_secret(
            var,
            &format!("{} API key", provider.label()),
            prompt,
        )?),
        None => None,
    };
    let urls = &config.base_urls;

    let model: Arc<dyn ChatModel> = match provider {
        Provider::OpenAI | Provider::Groq | Provider::Mistral => {
            let base_url = match provider {
                Provider::OpenAI => &urls.openai,
                Provider::Groq => &urls.groq,
                _ => &urls.mistral,
            };
            Arc::new(openai::OpenAiCompatibleModel::new(
                provider,
                base_url,
                model_id,
                api_key.unwrap_or_default(),
                params,
            )?)
        }
        Provider::Anthropic => Arc::new(anthropic::AnthropicModel::new(
            &urls.anthropic,
            model_id,
            api_key.unwrap_or_default(),
            params,
        )?),
        Provider::Ollama => Arc::new(ollama::OllamaModel::new(&urls.ollama, model_id, params)?),
    };

    tracing::debug!(provider = %provider, model = model_id, "chat model ready");
    Ok(model)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RagError::ProviderSetup(format!("HTTP client: {}", e)).into())
}

/// Sends the request built by `build`, retrying transient failures.
///
/// Returns the successful response; non-retryable or exhausted failures are
/// [`RagError::Invocation`].
pub(crate) async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(attempt, ?delay, "{} retrying", label);
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = RagError::Invocation(format!("{} API error {}: {}", label, status, body_text));

                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err.into());
            }
            Err(e) => {
                last_err = Some(RagError::Invocation(format!("{} request failed: {}", label, e)));
                continue;
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| RagError::Invocation(format!("{} failed after retries", label)))
        .into())
}

/// Boxes a text stream, fixing its error type to `anyhow::Error`.
pub(crate) fn boxed<S>(stream: S) -> TextStream
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    Box::pin(stream)
}

/// Splits a streaming response body into trimmed, non-empty text lines.
pub(crate) fn body_lines(response: reqwest::Response) -> TextStream {
    let mut bytes_stream = response.bytes_stream();
    boxed(try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes_stream.next().await {
            let chunk = chunk.map_err(|e| RagError::Invocation(format!("stream interrupted: {}", e)))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }
        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield rest;
        }
    })
}

/// `data:` payload of a server-sent-event line, if any.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
