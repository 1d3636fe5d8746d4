//! Prompt construction and the two answer pipelines.
//!
//! Everything except [`run_plain_pipeline`] and [`run_rag_pipeline`] is a
//! pure function over the session's history, so prompts can be checked
//! without a model.

use anyhow::Result;
use futures::StreamExt;

use crate::llm::{ChatModel, PromptMessage};
use crate::models::{ChatMessage, Chunk};
use crate::vector_store::Retriever;

/// System prompt for turning a follow-up question into a standalone query.
pub const CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can \
be understood without the chat history. DO NOT answer the question, just reformulate it if \
needed and otherwise return it as is.";

/// Placeholder in a retrieval prompt that receives the stuffed chunks.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// The text appended to system prompts when an image has been analysed.
pub fn image_context(description: Option<&str>) -> String {
    match description {
        Some(d) if !d.trim().is_empty() => format!("\nRelevant Image Context: {}", d),
        _ => String::new(),
    }
}

fn with_history(system: String, history: &[ChatMessage], input: &str) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(system));
    messages.extend(
        history
            .iter()
            .map(|m| PromptMessage::text(m.role, m.content.clone())),
    );
    messages.push(PromptMessage::user(input));
    messages
}

/// System prompt, then history, then the user's input.
pub fn build_plain_prompt(
    system_prompt: &str,
    history: &[ChatMessage],
    input: &str,
    image_description: Option<&str>,
) -> Vec<PromptMessage> {
    let system = format!("{}{}", system_prompt, image_context(image_description));
    with_history(system, history, input)
}

/// Prompt asking the model to rewrite `input` as a standalone query.
pub fn build_rewrite_prompt(
    history: &[ChatMessage],
    input: &str,
    image_description: Option<&str>,
) -> Vec<PromptMessage> {
    let system = format!("{}{}", CONTEXTUALIZE_PROMPT, image_context(image_description));
    with_history(system, history, input)
}

/// Puts the chunk texts, separated by blank lines, into the retrieval prompt.
pub fn stuff_context(rag_prompt: &str, chunks: &[Chunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if rag_prompt.contains(CONTEXT_PLACEHOLDER) {
        rag_prompt.replace(CONTEXT_PLACEHOLDER, &context)
    } else {
        format!("{}\n\nContext:\n{}", rag_prompt, context)
    }
}

pub fn build_answer_prompt(
    rag_prompt: &str,
    chunks: &[Chunk],
    history: &[ChatMessage],
    input: &str,
    image_description: Option<&str>,
) -> Vec<PromptMessage> {
    let system = format!(
        "{}{}",
        stuff_context(rag_prompt, chunks),
        image_context(image_description)
    );
    with_history(system, history, input)
}

/// Chunk sources, deduplicated, in the order first seen.
pub fn unique_sources(chunks: &[Chunk]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for chunk in chunks {
        if !sources.iter().any(|s| s == &chunk.source) {
            sources.push(chunk.source.clone());
        }
    }
    sources
}

/// The answer as displayed, with a source line when there are sources.
pub fn format_cited_answer(answer: &str, sources: &[String]) -> String {
    if sources.is_empty() {
        return answer.to_string();
    }
    format!("{}\n\n📌 Source: {}", answer, sources.join(", "))
}

/// Result of one retrieval-augmented turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    /// The query actually sent to the retriever.
    pub query: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub chunks: Vec<Chunk>,
}

impl RagAnswer {
    pub fn cited(&self) -> String {
        format_cited_answer(&self.answer, &self.sources)
    }
}

/// Rewrite, retrieve, answer.
///
/// The rewrite is skipped when `history` is empty. A failing retriever
/// degrades to an answer without context.
pub async fn run_rag_pipeline(
    model: &dyn ChatModel,
    retriever: &dyn Retriever,
    rag_prompt: &str,
    history: &[ChatMessage],
    input: &str,
    image_description: Option<&str>,
) -> Result<RagAnswer> {
    let query = if history.is_empty() {
        input.to_string()
    } else {
        let rewritten = model
            .complete(&build_rewrite_prompt(history, input, image_description))
            .await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            input.to_string()
        } else {
            rewritten.to_string()
        }
    };

    let chunks = match retriever.retrieve(&query).await {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval failed, answering without context");
            Vec::new()
        }
    };

    let answer = model
        .complete(&build_answer_prompt(
            rag_prompt,
            &chunks,
            history,
            input,
            image_description,
        ))
        .await?;

    Ok(RagAnswer {
        query,
        answer,
        sources: unique_sources(&chunks),
        chunks,
    })
}

/// Streams a plain answer, passing each delta to `on_delta`, and returns the
/// full text.
pub async fn run_plain_pipeline(
    model: &dyn ChatModel,
    system_prompt: &str,
    history: &[ChatMessage],
    input: &str,
    image_description: Option<&str>,
    on_delta: &mut (dyn FnMut(&str) + Send),
) -> Result<String> {
    let prompt = build_plain_prompt(system_prompt, history, input, image_description);
    let mut stream = model.stream(&prompt).await?;
    let mut answer = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        on_delta(&delta);
        answer.push_str(&delta);
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Provider;
    use crate::models::Role;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            id: text.into(),
            source: source.into(),
            chunk_index: 0,
            text: text.into(),
            hash: String::new(),
        }
    }

    fn turn(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    /// Replies with the queued answers in order and records every prompt.
    struct Scripted {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<Vec<PromptMessage>>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn provider(&self) -> Provider {
            Provider::Ollama
        }
        fn model_id(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[PromptMessage]) -> Result<String> {
            self.prompts.lock().unwrap().push(messages.to_vec());
            Ok(self.replies.lock().unwrap().pop().unwrap_or_default())
        }
    }

    struct Fixed(Vec<Chunk>, Mutex<Vec<String>>);

    #[async_trait]
    impl Retriever for Fixed {
        async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
            self.1.lock().unwrap().push(query.to_string());
            Ok(self.0.clone())
        }
    }

    #[test]
    fn plain_prompt_orders_system_history_input() {
        let history = vec![turn(Role::User, "hi"), turn(Role::Assistant, "hello")];
        let prompt = build_plain_prompt("Be nice.", &history, "next", Some("a red car"));
        assert_eq!(prompt.len(), 4);
        assert_eq!(
            prompt[0].text_content(),
            "Be nice.\nRelevant Image Context: a red car"
        );
        assert_eq!(prompt[2].role, Role::Assistant);
        assert_eq!(prompt[3], PromptMessage::user("next"));
    }

    #[test]
    fn context_is_stuffed_or_appended() {
        let chunks = vec![chunk("a", "one"), chunk("b", "two")];
        assert_eq!(stuff_context("Use: {context}!", &chunks), "Use: one\n\ntwo!");
        assert_eq!(
            stuff_context("Answer well.", &chunks),
            "Answer well.\n\nContext:\none\n\ntwo"
        );
    }

    #[test]
    fn sources_keep_first_seen_order() {
        let chunks = vec![chunk("b.pdf", "1"), chunk("a.pdf", "2"), chunk("b.pdf", "3")];
        let sources = unique_sources(&chunks);
        assert_eq!(sources, vec!["b.pdf", "a.pdf"]);
        assert_eq!(
            format_cited_answer("42", &sources),
            "42\n\n📌 Source: b.pdf, a.pdf"
        );
        assert_eq!(format_cited_answer("42", &[]), "42");
    }

    #[tokio::test]
    async fn first_turn_skips_rewrite() {
        let model = Scripted::new(&["the answer"]);
        let retriever = Fixed(vec![chunk("a.pdf", "fact")], Mutex::new(Vec::new()));
        let out = run_rag_pipeline(&model, &retriever, "{context}", &[], "question", None)
            .await
            .unwrap();
        assert_eq!(out.query, "question");
        assert_eq!(out.answer, "the answer");
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
        assert_eq!(model.prompts.lock().unwrap()[0][0].text_content(), "fact");
    }

    #[tokio::test]
    async fn follow_up_is_rewritten_before_retrieval() {
        let model = Scripted::new(&["  standalone question \n", "answer"]);
        let retriever = Fixed(vec![], Mutex::new(Vec::new()));
        let history = vec![turn(Role::User, "q1"), turn(Role::Assistant, "a1")];
        let out = run_rag_pipeline(&model, &retriever, "{context}", &history, "and then?", None)
            .await
            .unwrap();
        assert_eq!(*retriever.1.lock().unwrap(), vec!["standalone question".to_string()]);
        assert!(out.sources.is_empty());
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0][0].text_content().starts_with("Given a chat history"));
        assert_eq!(prompts[1].len(), 4);
    }

    #[tokio::test]
    async fn plain_pipeline_forwards_deltas() {
        let model = Scripted::new(&["streamed"]);
        let mut seen = Vec::new();
        let answer = run_plain_pipeline(&model, "sys", &[], "hi", None, &mut |d: &str| {
            seen.push(d.to_string())
        })
        .await
        .unwrap();
        assert_eq!(answer, "streamed");
        assert_eq!(seen, vec!["streamed"]);
    }
}
