//! `ragbot index` subcommands.

use anyhow::Result;

use crate::config::Config;
use crate::credentials::TerminalPrompt;
use crate::embedding::shared_embedder;
use crate::index_builder::{BuildReport, IndexBuilder};
use crate::loader::{load_documents, DocumentSource};
use crate::vector_store::IndexStore;

/// Picks the document source from CLI flags. Without `--s3-bucket` the
/// local folder defaults to the index name.
pub fn source_from_args(
    name: &str,
    folder: Option<String>,
    s3_bucket: Option<String>,
    s3_prefix: Option<String>,
) -> DocumentSource {
    match s3_bucket {
        Some(bucket) => DocumentSource::S3 {
            bucket,
            prefix: s3_prefix.unwrap_or_default(),
        },
        None => DocumentSource::Local {
            folder: folder.unwrap_or_else(|| name.to_string()),
        },
    }
}

pub fn run_list(config: &Config) -> Result<()> {
    let store = IndexStore::from_config(config);
    let names = store.list_indexes()?;
    if names.is_empty() {
        println!("No vector indexes in {}", store.root().display());
        return Ok(());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub async fn run_create(config: &Config, name: &str, source: &DocumentSource) -> Result<()> {
    let documents = load_documents(source, config, &TerminalPrompt).await?;
    let embedder = shared_embedder(&config.embedding).await?;
    let report = IndexBuilder::from_config(config, embedder)
        .create(&documents, name)
        .await?;
    print_report("index create", source, &report);
    Ok(())
}

pub async fn run_resync(config: &Config, name: &str, source: &DocumentSource) -> Result<()> {
    let documents = load_documents(source, config, &TerminalPrompt).await?;
    let embedder = shared_embedder(&config.embedding).await?;
    let report = IndexBuilder::from_config(config, embedder)
        .resync(name, &documents)
        .await?;
    print_report("index resync", source, &report);
    Ok(())
}

pub fn run_delete(config: &Config, name: &str) -> Result<()> {
    IndexStore::from_config(config).delete(name)?;
    println!("Deleted vector index '{}'.", name);
    Ok(())
}

fn print_report(action: &str, source: &DocumentSource, report: &BuildReport) {
    println!("{} {}", action, report.name);
    println!("  source: {}", source);
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  sources: {}", report.sources.join(", "));
    println!("  path: {}", report.dir.display());
    println!("ok");
}
