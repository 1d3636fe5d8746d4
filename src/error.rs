//! Error taxonomy.
//!
//! Functions return `anyhow::Result`; a [`RagError`] is attached where the
//! caller needs to branch on the failure kind (HTTP status, "continue without
//! retrieval", ...). Recover it with [`classify`].

/// Classified failures.
#[derive(Debug, Clone, PartialEq)]
pub enum RagError {
    /// A required secret was absent from the environment and not supplied
    /// interactively.
    MissingCredential(String),
    /// Unknown model, unsupported provider for the request, or a client that
    /// could not be built.
    ProviderSetup(String),
    IndexNotFound(String),
    IndexExists(String),
    /// The document source is unusable (missing folder, bucket error).
    IndexSource(String),
    NoDocuments,
    NoChunks,
    /// An index exists on disk but cannot be used.
    IndexLoad(String),
    InvalidIndexName(String),
    /// A provider call failed.
    Invocation(String),
    /// The session lacks a selection the operation needs.
    NotConfigured(String),
    NotFound(String),
    InvalidInput(String),
}

impl std::fmt::Display for RagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RagError::MissingCredential(what) => write!(f, "missing credential: {}", what),
            RagError::ProviderSetup(msg) => write!(f, "provider setup failed: {}", msg),
            RagError::IndexNotFound(name) => write!(f, "vector index '{}' not found", name),
            RagError::IndexExists(name) => write!(f, "vector index '{}' already exists", name),
            RagError::IndexSource(msg) => write!(f, "document source unavailable: {}", msg),
            RagError::NoDocuments => write!(f, "no documents found to index"),
            RagError::NoChunks => write!(f, "documents produced no text chunks"),
            RagError::IndexLoad(msg) => write!(f, "failed to load vector index: {}", msg),
            RagError::InvalidIndexName(name) => write!(f, "invalid index name: '{}'", name),
            RagError::Invocation(msg) => write!(f, "model invocation failed: {}", msg),
            RagError::NotConfigured(msg) => write!(f, "not configured: {}", msg),
            RagError::NotFound(what) => write!(f, "not found: {}", what),
            RagError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for RagError {}

/// Finds the first [`RagError`] in an error chain.
pub fn classify(err: &anyhow::Error) -> Option<&RagError> {
    err.chain().find_map(|e| e.downcast_ref::<RagError>())
}

/// True if `err` carries the given variant (payload ignored).
pub fn is_kind(err: &anyhow::Error, check: fn(&RagError) -> bool) -> bool {
    classify(err).map(check).unwrap_or(false)
}
