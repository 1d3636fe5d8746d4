//! Document loading for index builds.
//!
//! A [`DocumentSource`] names where the PDFs live: a folder under
//! `<root>/context_folder/`, or a bucket and key prefix on S3. Every PDF
//! becomes one [`Document`] tagged with its file name (local) or object key
//! (S3). PDFs that fail to extract are skipped with a warning.

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::credentials::{AwsCredentials, SecretPrompt};
use crate::error::RagError;
use crate::extract::{extract_pdf, ExtractError};
use crate::models::Document;
use crate::s3::S3Client;
use crate::vector_store::validate_name;

/// Where an index's documents come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentSource {
    /// A folder name under `<root>/context_folder/`.
    Local { folder: String },
    S3 {
        bucket: String,
        #[serde(default)]
        prefix: String,
    },
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentSource::Local { folder } => write!(f, "context_folder/{}", folder),
            DocumentSource::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
        }
    }
}

/// Turns PDF bytes into text.
pub type Extractor = dyn Fn(&[u8]) -> Result<String, ExtractError> + Send + Sync;

/// Loads every PDF from `source` using the PDF extractor.
pub async fn load_documents(
    source: &DocumentSource,
    config: &Config,
    prompt: &dyn SecretPrompt,
) -> Result<Vec<Document>> {
    match source {
        DocumentSource::Local { folder } => {
            validate_name(folder)?;
            let dir = config.paths.context_folder().join(folder);
            load_local(&dir, &extract_pdf)
        }
        DocumentSource::S3 { bucket, prefix } => {
            let creds = AwsCredentials::resolve(prompt)?;
            let client = S3Client::new(bucket, creds, config.s3.endpoint_url.clone());
            load_s3(&client, prefix, &extract_pdf).await
        }
    }
}

fn pdf_matcher() -> Result<GlobMatcher> {
    Ok(GlobBuilder::new("*.pdf")
        .case_insensitive(true)
        .build()?
        .compile_matcher())
}

/// Loads the PDFs directly inside `dir` (no recursion), in file name order.
pub fn load_local(dir: &Path, extract: &Extractor) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        return Err(RagError::IndexSource(format!(
            "folder does not exist: {}",
            dir.display()
        ))
        .into());
    }

    let matcher = pdf_matcher()?;
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    let mut documents = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !matcher.is_match(&name) {
            continue;
        }

        let bytes = match std::fs::read(entry.path()) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("Warning: failed to read {}: {}", entry.path().display(), e);
                continue;
            }
        };
        match extract(&bytes) {
            Ok(text) => documents.push(Document::new(name, text)),
            Err(e) => eprintln!("Warning: skipping {}: {}", name, e),
        }
    }

    if documents.is_empty() {
        return Err(RagError::NoDocuments.into());
    }
    tracing::info!(dir = %dir.display(), documents = documents.len(), "loaded local documents");
    Ok(documents)
}

/// Loads every PDF object under `prefix`, in key order.
pub async fn load_s3(client: &S3Client, prefix: &str, extract: &Extractor) -> Result<Vec<Document>> {
    let objects = client
        .list_objects(prefix)
        .await
        .map_err(|e| RagError::IndexSource(format!("{:#}", e)))?;

    let matcher = pdf_matcher()?;
    let mut keys: Vec<String> = objects
        .into_iter()
        .map(|o| o.key)
        .filter(|k| matcher.is_match(k))
        .collect();
    keys.sort();

    let mut documents = Vec::new();
    for key in keys {
        let bytes = match client.get_object(&key).await {
            Ok(b) => b,
            Err(e) => {
                eprintln!(
                    "Warning: failed to download s3://{}/{}: {}",
                    client.bucket(),
                    key,
                    e
                );
                continue;
            }
        };
        match extract(&bytes) {
            Ok(text) => documents.push(Document::new(key, text)),
            Err(e) => eprintln!("Warning: skipping s3://{}/{}: {}", client.bucket(), key, e),
        }
    }

    if documents.is_empty() {
        return Err(RagError::NoDocuments.into());
    }
    tracing::info!(bucket = client.bucket(), prefix, documents = documents.len(), "loaded S3 documents");
    Ok(documents)
}
