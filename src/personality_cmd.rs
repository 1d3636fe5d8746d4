//! `ragbot personality` subcommands.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::RagError;
use crate::models::{Personality, PersonalityInput};
use crate::personality::PersonalityStore;
use crate::{db, migrate};

/// Connects to the personality database, creating the schema if needed.
pub async fn open_store(config: &Config) -> Result<PersonalityStore> {
    let pool: SqlitePool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(PersonalityStore::new(pool))
}

/// Prompt arguments starting with `@` name a file to read the prompt from.
pub fn read_prompt_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path)),
        None => Ok(value.to_string()),
    }
}

/// Optional replacements for `personality update`.
#[derive(Debug, Default)]
pub struct PersonalityPatch {
    pub name: Option<String>,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub system_prompt_rag: Option<String>,
}

impl PersonalityPatch {
    pub fn apply(self, current: &Personality) -> Result<PersonalityInput> {
        let prompt = |v: Option<String>, old: &str| -> Result<String> {
            match v {
                Some(v) => read_prompt_arg(&v),
                None => Ok(old.to_string()),
            }
        };
        Ok(PersonalityInput {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            title: self.title.unwrap_or_else(|| current.title.clone()),
            system_prompt: prompt(self.system_prompt, &current.system_prompt)?,
            system_prompt_rag: prompt(self.system_prompt_rag, &current.system_prompt_rag)?,
        })
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let personalities = store.list().await?;
    if personalities.is_empty() {
        println!("No personalities yet. Add one with `ragbot personality add`.");
    }
    for p in &personalities {
        println!("{:>4}  {:<24} {}", p.id, p.name, p.title);
    }
    store.pool().close().await;
    Ok(())
}

pub async fn run_show(config: &Config, id: i64) -> Result<()> {
    let store = open_store(config).await?;
    let p = store
        .get(id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("personality {}", id)))?;
    println!("id: {}", p.id);
    println!("name: {}", p.name);
    println!("title: {}", p.title);
    println!("system prompt:\n{}\n", p.system_prompt);
    println!("RAG system prompt:\n{}", p.system_prompt_rag);
    store.pool().close().await;
    Ok(())
}

pub async fn run_add(config: &Config, input: PersonalityInput) -> Result<()> {
    let store = open_store(config).await?;
    let input = PersonalityInput {
        system_prompt: read_prompt_arg(&input.system_prompt)?,
        system_prompt_rag: read_prompt_arg(&input.system_prompt_rag)?,
        ..input
    };
    let p = store.add(&input).await?;
    println!("Added personality {} ({}).", p.id, p.name);
    store.pool().close().await;
    Ok(())
}

pub async fn run_update(config: &Config, id: i64, patch: PersonalityPatch) -> Result<()> {
    let store = open_store(config).await?;
    let current = store
        .get(id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("personality {}", id)))?;
    let input = patch.apply(&current)?;
    store.update(id, &input).await?;
    println!("Updated personality {}.", id);
    store.pool().close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, id: i64) -> Result<()> {
    let store = open_store(config).await?;
    store.delete(id).await?;
    println!("Deleted personality {}.", id);
    store.pool().close().await;
    Ok(())
}
