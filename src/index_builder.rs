//! Index lifecycle: create, resync, delete.
//!
//! A build chunks every document semantically, embeds the chunks in batches
//! and only then writes the index directory, so a failed build leaves
//! nothing behind. Resync is delete followed by create and is not atomic.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::chunk::split_documents;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{embed_batched, Embedder};
use crate::error::RagError;
use crate::models::Document;
use crate::vector_store::{validate_name, IndexStore, VectorIndex};

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub name: String,
    pub documents: usize,
    pub chunks: usize,
    pub sources: Vec<String>,
    pub dir: PathBuf,
}

pub struct IndexBuilder {
    store: IndexStore,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(
        store: IndexStore,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            IndexStore::from_config(config),
            embedder,
            config.chunking.clone(),
            config.embedding.batch_size,
        )
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Builds a new index named `name` from `documents`.
    pub async fn create(&self, documents: &[Document], name: &str) -> Result<BuildReport> {
        if documents.is_empty() {
            return Err(RagError::NoDocuments.into());
        }
        validate_name(name)?;
        if self.store.exists(name)? {
            return Err(RagError::IndexExists(name.to_string()).into());
        }

        let chunks = split_documents(
            documents,
            self.embedder.as_ref(),
            &self.chunking,
            self.batch_size,
        )
        .await?;
        if chunks.is_empty() {
            return Err(RagError::NoChunks.into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size).await?;

        let mut sources: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }

        let chunk_count = chunks.len();
        let index = VectorIndex::new(
            name,
            self.embedder.model_name(),
            self.embedder.dims(),
            chunks,
            vectors,
        )?;
        let dir = self.store.save(&index)?;

        tracing::info!(index = name, chunks = chunk_count, "built vector index");
        Ok(BuildReport {
            name: name.to_string(),
            documents: documents.len(),
            chunks: chunk_count,
            sources,
            dir,
        })
    }

    /// Replaces an existing index with one built from `documents`.
    pub async fn resync(&self, name: &str, documents: &[Document]) -> Result<BuildReport> {
        if documents.is_empty() {
            return Err(RagError::NoDocuments.into());
        }
        if !self.store.exists(name)? {
            return Err(RagError::IndexNotFound(name.to_string()).into());
        }
        self.store.delete(name)?;
        self.create(documents, name).await
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.store.delete(name)?;
        tracing::info!(index = name, "deleted vector index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
        }
    }

    fn builder(tmp: &TempDir) -> IndexBuilder {
        IndexBuilder::new(
            IndexStore::new(tmp.path().join("vector_dbs")),
            Arc::new(LengthEmbedder),
            ChunkingConfig::default(),
            2,
        )
    }

    #[tokio::test]
    async fn create_then_exists() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp);
        let docs = vec![
            Document::new("a.pdf", "One. Two. Three."),
            Document::new("b.pdf", "Four."),
        ];
        let report = b.create(&docs, "docs").await.unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.sources, vec!["a.pdf", "b.pdf"]);
        assert!(b.store().exists("docs").unwrap());

        let err = b.create(&docs, "docs").await.unwrap_err();
        assert_eq!(classify(&err), Some(&RagError::IndexExists("docs".into())));
    }

    #[tokio::test]
    async fn whitespace_documents_have_no_chunks() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp);
        let err = b
            .create(&[Document::new("blank.pdf", "  ")], "blank")
            .await
            .unwrap_err();
        assert_eq!(classify(&err), Some(&RagError::NoChunks));
        assert!(!b.store().exists("blank").unwrap());
    }

    #[tokio::test]
    async fn resync_requires_existing_index() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp);
        let err = b
            .resync("ghost", &[Document::new("a.pdf", "Text.")])
            .await
            .unwrap_err();
        assert_eq!(classify(&err), Some(&RagError::IndexNotFound("ghost".into())));
    }

    #[tokio::test]
    async fn resync_with_no_documents_keeps_index() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp);
        b.create(&[Document::new("a.pdf", "Text.")], "docs").await.unwrap();

        let err = b.resync("docs", &[]).await.unwrap_err();
        assert_eq!(classify(&err), Some(&RagError::NoDocuments));
        assert!(b.store().exists("docs").unwrap());
    }

    #[tokio::test]
    async fn resync_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let b = builder(&tmp);
        b.create(&[Document::new("old.pdf", "Old text.")], "docs").await.unwrap();
        let report = b
            .resync("docs", &[Document::new("new.pdf", "New text.")])
            .await
            .unwrap();
        assert_eq!(report.sources, vec!["new.pdf"]);
    }

    /// Records the largest batch passed to a single `embed` call.
    #[derive(Default)]
    struct BatchWatcher {
        largest: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Embedder for BatchWatcher {
        fn model_name(&self) -> &str {
            "watcher"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.largest
                .fetch_max(texts.len(), std::sync::atomic::Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn sentence_embeddings_respect_batch_size() {
        let tmp = TempDir::new().unwrap();
        let watcher = Arc::new(BatchWatcher::default());
        let b = IndexBuilder::new(
            IndexStore::new(tmp.path().join("vector_dbs")),
            watcher.clone(),
            ChunkingConfig::default(),
            32,
        );
        let text = (0..500)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ");

        let report = b.create(&[Document::new("long.pdf", &text)], "long").await.unwrap();
        assert!(report.chunks > 0);
        let largest = watcher.largest.load(std::sync::atomic::Ordering::SeqCst);
        assert!(largest <= 32, "largest embed call was {}", largest);
        assert!(largest > 1);
    }
}
