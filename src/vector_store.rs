//! Disk-persisted vector indexes and retrieval.
//!
//! Each index lives in its own directory under `<root>/vector_dbs/<name>/`:
//!
//! | File | Content |
//! |------|---------|
//! | `index.json` | manifest: format version, name, embedding model, dims, creation time, chunks |
//! | `vectors.bin` | little-endian `f32`, one row of `dims` values per chunk, in chunk order |
//!
//! An index is only ever written whole (by the index builder) or deleted
//! whole. [`IndexSlot`] holds the one index a chat session currently uses.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::RagError;
use crate::models::Chunk;

pub const MANIFEST_FILE: &str = "index.json";
pub const VECTORS_FILE: &str = "vectors.bin";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub name: String,
    pub embedding_model: String,
    pub dims: usize,
    pub created_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
}

/// A chunk with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Pairs `chunks` with their `vectors`; every vector must have `dims` values.
    pub fn new(
        name: &str,
        embedding_model: &str,
        dims: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "{} chunks but {} vectors for index '{}'",
                chunks.len(),
                vectors.len(),
                name
            );
        }
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
            anyhow::bail!(
                "vector {} has {} dimensions, expected {}",
                bad,
                vectors[bad].len(),
                dims
            );
        }
        Ok(Self {
            manifest: IndexManifest {
                format_version: FORMAT_VERSION,
                name: name.to_string(),
                embedding_model: embedding_model.to_string(),
                dims,
                created_at: Utc::now(),
                chunks,
            },
            vectors,
        })
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn embedding_model(&self) -> &str {
        &self.manifest.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.manifest.dims
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.manifest.chunks
    }

    pub fn len(&self) -> usize {
        self.manifest.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.chunks.is_empty()
    }

    /// Writes the manifest and vectors into `dir`, creating it.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let manifest = serde_json::to_vec(&self.manifest)?;
        std::fs::write(dir.join(MANIFEST_FILE), manifest)?;

        let mut blob = Vec::with_capacity(self.vectors.len() * self.dims() * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)?;
        Ok(())
    }

    /// Reads an index written by [`VectorIndex::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_bytes = std::fs::read(dir.join(MANIFEST_FILE))
            .map_err(|e| RagError::IndexLoad(format!("{}: {}", dir.display(), e)))?;
        let manifest: IndexManifest = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| RagError::IndexLoad(format!("corrupt manifest: {}", e)))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::IndexLoad(format!(
                "unsupported format version {}",
                manifest.format_version
            ))
            .into());
        }

        let blob = std::fs::read(dir.join(VECTORS_FILE))
            .map_err(|e| RagError::IndexLoad(format!("{}: {}", dir.display(), e)))?;
        let expected = manifest.chunks.len() * manifest.dims * 4;
        if blob.len() != expected {
            return Err(RagError::IndexLoad(format!(
                "vector file is {} bytes, expected {}",
                blob.len(),
                expected
            ))
            .into());
        }

        let flat = blob_to_vec(&blob);
        let vectors = if manifest.dims == 0 {
            vec![Vec::new(); manifest.chunks.len()]
        } else {
            flat.chunks(manifest.dims).map(|c| c.to_vec()).collect()
        };
        Ok(Self { manifest, vectors })
    }

    /// The `k` chunks most similar to `query`, best first.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| ScoredChunk {
                chunk: self.manifest.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

/// Index names must be a single plain path component.
pub fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let valid = !name.trim().is_empty()
        && matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(|c| c == '/' || c == '\\');
    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidIndexName(name.to_string()).into())
    }
}

/// Loads a named index for a given embedding model.
pub trait IndexLoader: Send + Sync {
    fn load_index(&self, name: &str, embedding_model: &str) -> Result<VectorIndex>;
}

/// The `vector_dbs/` directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.vector_dbs())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted index names. A missing root means no indexes.
    pub fn list_indexes(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn index_dir(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.index_dir(name)?.is_dir())
    }

    pub fn save(&self, index: &VectorIndex) -> Result<PathBuf> {
        let dir = self.index_dir(index.name())?;
        index.save(&dir)?;
        Ok(dir)
    }

    /// Removes an index directory and everything in it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let dir = self.index_dir(name)?;
        if !dir.is_dir() {
            return Err(RagError::IndexNotFound(name.to_string()).into());
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete {}", dir.display()))?;
        Ok(())
    }
}

impl IndexLoader for IndexStore {
    fn load_index(&self, name: &str, embedding_model: &str) -> Result<VectorIndex> {
        let dir = self.index_dir(name)?;
        if !dir.is_dir() {
            return Err(RagError::IndexNotFound(name.to_string()).into());
        }
        let index = VectorIndex::load(&dir)?;
        if index.embedding_model() != embedding_model {
            return Err(RagError::IndexLoad(format!(
                "index '{}' was built with '{}', current embedding model is '{}'",
                name,
                index.embedding_model(),
                embedding_model
            ))
            .into());
        }
        tracing::debug!(index = name, chunks = index.len(), "loaded vector index");
        Ok(index)
    }
}

/// Fetches context chunks for a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>>;
}

/// Top-k cosine retrieval over one loaded index.
pub struct IndexRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Chunk>> {
        let vector = self.embedder.embed_query(query).await?;
        Ok(self
            .index
            .similarity_search(&vector, self.k)
            .into_iter()
            .map(|s| s.chunk)
            .collect())
    }
}

/// The index a session currently retrieves from, if any.
#[derive(Default, Clone)]
pub struct IndexSlot {
    current: Option<Arc<VectorIndex>>,
}

impl IndexSlot {
    /// Makes `name` current. Returns `Ok(false)` without touching disk when
    /// it already is. On failure the slot is left empty.
    pub fn load(&mut self, loader: &dyn IndexLoader, name: &str, embedding_model: &str) -> Result<bool> {
        if self.current_name() == Some(name) {
            return Ok(false);
        }
        self.current = None;
        let index = loader.load_index(name, embedding_model)?;
        self.current = Some(Arc::new(index));
        Ok(true)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current.as_deref().map(VectorIndex::name)
    }

    pub fn current(&self) -> Option<Arc<VectorIndex>> {
        self.current.clone()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// A retriever over the current index, or `None` when nothing is loaded.
    pub fn retriever(&self, embedder: Arc<dyn Embedder>, k: usize) -> Option<IndexRetriever> {
        self.current.as_ref().map(|index| IndexRetriever {
            index: Arc::clone(index),
            embedder,
            k,
        })
    }
}
