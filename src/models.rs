//! Core data models shared by the index builder, the vector store and the
//! chat orchestrator.

use serde::{Deserialize, Serialize};

/// One source document: the full extracted text of a PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// File name (local) or object key (S3) the text came from.
    pub source: String,
    pub text: String,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }
}

/// A semantically coherent span of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A stored prompt pair used to steer the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub id: i64,
    pub name: String,
    pub system_prompt: String,
    pub system_prompt_rag: String,
    pub title: String,
}

/// Fields of a personality without its id, as supplied on add/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalityInput {
    pub name: String,
    pub system_prompt: String,
    pub system_prompt_rag: String,
    pub title: String,
}

/// A displayed chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}
