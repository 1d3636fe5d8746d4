//! One chat session: selection state plus conversation.
//!
//! A session belongs to a personality and is identified by
//! `rag_<sha256 of the personality name>`. It keeps two lists in lockstep:
//! the displayed messages (assistant answers carry the source line) and the
//! history store the model sees (bare answers). A turn is recorded only after
//! it fully succeeds.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::history::HistoryStore;
use super::image::{ImageAnalysis, ImageDescription};
use super::pipeline::{run_plain_pipeline, run_rag_pipeline};
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Personality, Role};
use crate::vector_store::{IndexLoader, IndexSlot, Retriever};

pub fn session_id_for(personality_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(personality_name.as_bytes());
    format!("rag_{:x}", hasher.finalize())
}

/// What one successful turn produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    /// The assistant message as displayed.
    pub displayed: String,
    /// The answer as recorded in history.
    pub answer: String,
    pub sources: Vec<String>,
    pub used_retrieval: bool,
}

pub struct ChatSession {
    id: String,
    personality: Personality,
    model: Option<Arc<dyn ChatModel>>,
    vision_model: Option<Arc<dyn ChatModel>>,
    index: IndexSlot,
    retriever: Option<Arc<dyn Retriever>>,
    messages: Vec<ChatMessage>,
    history: HistoryStore,
    image: ImageAnalysis,
}

impl ChatSession {
    pub fn new(personality: Personality) -> Self {
        Self {
            id: session_id_for(&personality.name),
            personality,
            model: None,
            vision_model: None,
            index: IndexSlot::default(),
            retriever: None,
            messages: Vec::new(),
            history: HistoryStore::new(),
            image: ImageAnalysis::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn history(&self) -> &[ChatMessage] {
        self.history.messages(&self.id)
    }

    pub fn model(&self) -> Option<&Arc<dyn ChatModel>> {
        self.model.as_ref()
    }

    pub fn set_model(&mut self, model: Arc<dyn ChatModel>) {
        tracing::debug!(session = %self.id, model = model.model_id(), "chat model selected");
        self.model = Some(model);
    }

    pub fn set_vision_model(&mut self, model: Arc<dyn ChatModel>) {
        self.vision_model = Some(model);
    }

    pub fn index_name(&self) -> Option<&str> {
        self.index.current_name()
    }

    pub fn retrieval_enabled(&self) -> bool {
        self.retriever.is_some()
    }

    /// Loads `name` and retrieves from it on later turns.
    ///
    /// Returns `Ok(false)` if it was already loaded. On failure the session
    /// continues without retrieval and the error is returned for reporting.
    pub fn load_index(
        &mut self,
        loader: &dyn IndexLoader,
        name: &str,
        embedder: Arc<dyn Embedder>,
        k: usize,
    ) -> Result<bool> {
        let model_name = embedder.model_name().to_string();
        match self.index.load(loader, name, &model_name) {
            Ok(changed) => {
                if let Some(retriever) = self.index.retriever(embedder, k) {
                    self.retriever = Some(Arc::new(retriever));
                }
                Ok(changed)
            }
            Err(e) => {
                self.retriever = None;
                Err(e)
            }
        }
    }

    /// Retrieves from `retriever` instead of a loaded index.
    pub fn set_retriever(&mut self, retriever: Arc<dyn Retriever>) {
        self.retriever = Some(retriever);
    }

    /// Stops retrieval and unloads the index.
    pub fn disable_retrieval(&mut self) {
        self.index.clear();
        self.retriever = None;
    }

    pub fn image_description(&self) -> Option<&str> {
        self.image.description()
    }

    /// Describes an uploaded image with the vision model.
    pub async fn analyze_image(&mut self, bytes: &[u8]) -> Result<ImageDescription> {
        let model = self
            .vision_model
            .clone()
            .ok_or_else(|| RagError::NotConfigured("select a vision model first".into()))?;
        self.image.analyze(model.as_ref(), bytes).await
    }

    /// Runs one turn. Plain turns stream deltas through `on_delta`; retrieval
    /// turns deliver the whole cited answer once.
    ///
    /// Nothing is recorded when the turn fails.
    pub async fn submit(
        &mut self,
        input: &str,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<TurnOutcome> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| RagError::NotConfigured("select a chat model first".into()))?;
        if input.trim().is_empty() {
            return Err(RagError::InvalidInput("message is empty".into()).into());
        }

        let history = self.history.messages(&self.id).to_vec();
        let image = self.image.description().map(str::to_string);

        let outcome = match &self.retriever {
            Some(retriever) => {
                let rag = run_rag_pipeline(
                    model.as_ref(),
                    retriever.as_ref(),
                    &self.personality.system_prompt_rag,
                    &history,
                    input,
                    image.as_deref(),
                )
                .await?;
                let displayed = rag.cited();
                on_delta(&displayed);
                TurnOutcome {
                    displayed,
                    answer: rag.answer,
                    sources: rag.sources,
                    used_retrieval: true,
                }
            }
            None => {
                let answer = run_plain_pipeline(
                    model.as_ref(),
                    &self.personality.system_prompt,
                    &history,
                    input,
                    image.as_deref(),
                    on_delta,
                )
                .await?;
                TurnOutcome {
                    displayed: answer.clone(),
                    answer,
                    sources: Vec::new(),
                    used_retrieval: false,
                }
            }
        };

        self.record(input, &outcome);
        Ok(outcome)
    }

    fn record(&mut self, input: &str, outcome: &TurnOutcome) {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: input.to_string(),
        });
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            content: outcome.displayed.clone(),
        });
        self.history.push(&self.id, Role::User, input);
        self.history.push(&self.id, Role::Assistant, outcome.answer.clone());
    }

    /// Forgets the conversation and the image; keeps model and index.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.history.clear(&self.id);
        self.image.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_stable_per_personality() {
        let a = session_id_for("tutor");
        assert_eq!(a, session_id_for("tutor"));
        assert_ne!(a, session_id_for("critic"));
        assert!(a.starts_with("rag_"));
        assert_eq!(a.len(), 4 + 64);
    }
}
