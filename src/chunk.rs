//! Semantic text chunker.
//!
//! Splits a document into sentences, embeds each sentence together with its
//! neighbours, and starts a new chunk wherever the embedding distance between
//! consecutive sentences is an outlier:
//!
//! ```text
//! distance[i] = 1 - cos(combined[i], combined[i + 1])
//! breakpoint  where distance > mean + breakpoint_std_devs * std_dev
//! ```
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use anyhow::Result;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, embed_batched, Embedder};
use crate::models::{Chunk, Document};

/// Splits text into sentences at `.`, `?` or `!` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '?' | '!') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            push_trimmed(&mut sentences, &current);
            current.clear();
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
        }
    }
    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, s: &str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Joins each sentence with up to `buffer_size` neighbours on each side.
pub fn combine_sentences(sentences: &[String], buffer_size: usize) -> Vec<String> {
    (0..sentences.len())
        .map(|i| {
            let start = i.saturating_sub(buffer_size);
            let end = (i + buffer_size + 1).min(sentences.len());
            sentences[start..end].join(" ")
        })
        .collect()
}

/// Cosine distance between each pair of consecutive embeddings.
pub fn sentence_distances(embeddings: &[Vec<f32>]) -> Vec<f32> {
    embeddings
        .windows(2)
        .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
        .collect()
}

/// Indices `i` where a chunk ends after sentence `i`.
///
/// Uses the population standard deviation of `distances`.
pub fn breakpoint_indices(distances: &[f32], std_devs: f32) -> Vec<usize> {
    if distances.is_empty() {
        return Vec::new();
    }
    let n = distances.len() as f32;
    let mean = distances.iter().sum::<f32>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n;
    let threshold = mean + std_devs * variance.sqrt();

    distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Groups sentences into chunk texts, closing a group after each breakpoint.
pub fn group_sentences(sentences: &[String], breakpoints: &[usize]) -> Vec<String> {
    let mut groups = Vec::new();
    let mut start = 0;
    for &end in breakpoints {
        if end < start || end >= sentences.len() {
            continue;
        }
        groups.push(sentences[start..=end].join(" "));
        start = end + 1;
    }
    if start < sentences.len() {
        groups.push(sentences[start..].join(" "));
    }
    groups
}

/// Chunks one document. Text without sentences yields no chunks.
/// Sentence embeddings are requested `batch_size` at a time.
pub async fn chunk_document(
    document: &Document,
    embedder: &dyn Embedder,
    config: &ChunkingConfig,
    batch_size: usize,
) -> Result<Vec<Chunk>> {
    let sentences = split_sentences(&document.text);
    let texts = match sentences.len() {
        0 => Vec::new(),
        1 => sentences,
        _ => {
            let combined = combine_sentences(&sentences, config.buffer_size);
            let embeddings = embed_batched(embedder, &combined, batch_size).await?;
            let distances = sentence_distances(&embeddings);
            let breakpoints = breakpoint_indices(&distances, config.breakpoint_std_devs);
            group_sentences(&sentences, &breakpoints)
        }
    };

    Ok(texts
        .iter()
        .enumerate()
        .map(|(i, text)| make_chunk(&document.source, i as i64, text))
        .collect())
}

/// Chunks every document, in order.
pub async fn split_documents(
    documents: &[Document],
    embedder: &dyn Embedder,
    config: &ChunkingConfig,
    batch_size: usize,
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for document in documents {
        let doc_chunks = chunk_document(document, embedder, config, batch_size).await?;
        tracing::debug!(source = %document.source, chunks = doc_chunks.len(), "chunked document");
        chunks.extend(doc_chunks);
    }
    Ok(chunks)
}

fn make_chunk(source: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
