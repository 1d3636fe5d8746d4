//! Supported providers and the models offered for each.
//!
//! Display names are what the operator picks; the catalog maps them to the
//! provider's model id.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Groq,
    Mistral,
    Ollama,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::Groq,
        Provider::Mistral,
        Provider::Ollama,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Groq => "Groq",
            Provider::Mistral => "Mistral AI",
            Provider::Ollama => "Ollama",
        }
    }

    /// Lowercase identifier accepted by `FromStr`.
    pub fn slug(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Ollama => "ollama",
        }
    }

    /// Environment variable holding the API key. Ollama needs none.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Mistral => Some("MISTRAL_API_KEY"),
            Provider::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Provider {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "groq" => Ok(Provider::Groq),
            "mistral" | "mistral ai" | "mistralai" => Ok(Provider::Mistral),
            "ollama" => Ok(Provider::Ollama),
            other => Err(RagError::ProviderSetup(format!(
                "unknown provider '{}'",
                other
            ))),
        }
    }
}

/// (display name, model id) pairs.
pub type ModelList = &'static [(&'static str, &'static str)];

const OPENAI_MODELS: ModelList = &[
    ("ChatGPT 4o Mini", "gpt-4o-mini"),
    ("ChatGPT 4o", "gpt-4o"),
    ("OpenAI o1-preview", "o1-preview"),
    ("OpenAI o1-mini", "o1-mini"),
];

const ANTHROPIC_MODELS: ModelList = &[
    ("Claude 3.5 Sonnet", "claude-3-5-sonnet-20240620"),
    ("Claude 3 Opus", "claude-3-opus-20240229"),
    ("Claude 3 Haiku", "claude-3-haiku-20240307"),
];

const GROQ_MODELS: ModelList = &[
    ("Llama 3.1 70B (Preview)", "llama-3.1-70b-versatile"),
    ("Llama 3.1 8B (Preview)", "llama-3.1-8b-instant"),
    ("Llama 3.2 90B (Preview)", "llama-3.2-90b-text-preview"),
];

const MISTRAL_MODELS: ModelList = &[
    ("Mistral NeMo", "open-mistral-nemo-2407"),
    ("Mistral Large 2", "mistral-large-2407"),
    ("Mistral Small 24.09", "mistral-small-2409"),
    ("Codestral", "codestral-2405"),
];

const OLLAMA_MODELS: ModelList = &[
    ("Llama 3.2", "llama3.2"),
    ("Llama 3.1 8B", "llama3.1:8b"),
    ("Mistral 7B", "mistral"),
];

const OPENAI_VISION: ModelList = &[("GPT-4o", "gpt-4o"), ("GPT-4o Mini", "gpt-4o-mini")];

const ANTHROPIC_VISION: ModelList = &[
    ("Claude 3.5 Sonnet", "claude-3-5-sonnet-20240620"),
    ("Claude 3 Haiku", "claude-3-haiku-20240307"),
];

const OLLAMA_VISION: ModelList = &[("LLaVA", "llava"), ("Llama 3.2 Vision", "llama3.2-vision")];

/// Chat models offered for `provider`.
pub fn chat_models(provider: Provider) -> ModelList {
    match provider {
        Provider::OpenAI => OPENAI_MODELS,
        Provider::Anthropic => ANTHROPIC_MODELS,
        Provider::Groq => GROQ_MODELS,
        Provider::Mistral => MISTRAL_MODELS,
        Provider::Ollama => OLLAMA_MODELS,
    }
}

/// Vision-capable models for `provider`; empty when it has none.
pub fn vision_models(provider: Provider) -> ModelList {
    match provider {
        Provider::OpenAI => OPENAI_VISION,
        Provider::Anthropic => ANTHROPIC_VISION,
        Provider::Ollama => OLLAMA_VISION,
        Provider::Groq | Provider::Mistral => &[],
    }
}

fn lookup(list: ModelList, display_name: &str) -> Option<&'static str> {
    list.iter()
        .find(|(name, _)| *name == display_name)
        .map(|(_, id)| *id)
}

/// Resolves a chat model display name to its provider model id.
pub fn resolve_chat_model(provider: Provider, display_name: &str) -> Result<&'static str, RagError> {
    lookup(chat_models(provider), display_name).ok_or_else(|| {
        RagError::ProviderSetup(format!(
            "'{}' is not a {} chat model",
            display_name, provider
        ))
    })
}

/// Resolves a vision model display name to its provider model id.
pub fn resolve_vision_model(
    provider: Provider,
    display_name: &str,
) -> Result<&'static str, RagError> {
    let list = vision_models(provider);
    if list.is_empty() {
        return Err(RagError::ProviderSetup(format!(
            "{} has no vision models",
            provider
        )));
    }
    lookup(list, display_name).ok_or_else(|| {
        RagError::ProviderSetup(format!(
            "'{}' is not a {} vision model",
            display_name, provider
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_display_names() {
        assert_eq!(
            resolve_chat_model(Provider::Anthropic, "Claude 3 Haiku").unwrap(),
            "claude-3-haiku-20240307"
        );
        assert_eq!(
            resolve_chat_model(Provider::Groq, "Llama 3.1 8B (Preview)").unwrap(),
            "llama-3.1-8b-instant"
        );
    }

    #[test]
    fn unknown_model_is_provider_setup() {
        let err = resolve_chat_model(Provider::OpenAI, "Claude 3 Opus").unwrap_err();
        assert!(matches!(err, RagError::ProviderSetup(_)));
    }

    #[test]
    fn groq_has_no_vision() {
        assert!(resolve_vision_model(Provider::Groq, "anything").is_err());
        assert_eq!(
            resolve_vision_model(Provider::Ollama, "LLaVA").unwrap(),
            "llava"
        );
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!("Mistral AI".parse::<Provider>().unwrap(), Provider::Mistral);
        assert!("bedrock".parse::<Provider>().is_err());
    }

    #[test]
    fn every_provider_has_chat_models() {
        for provider in Provider::ALL {
            assert!(!chat_models(provider).is_empty(), "{}", provider);
        }
    }
}
