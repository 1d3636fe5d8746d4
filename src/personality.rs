//! Personality repository.
//!
//! A personality is a named pair of system prompts: one for plain chat and
//! one for retrieval-augmented chat (which should contain `{context}`).
//! Writes are last-write-wins.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::RagError;
use crate::models::{Personality, PersonalityInput};

/// Column limit for `personality_name` and `personality_title`.
pub const MAX_LABEL_CHARS: usize = 100;

const SELECT_COLUMNS: &str =
    "SELECT id, personality_name, system_prompt, system_prompt_rag, personality_title FROM personalities";

#[derive(Clone)]
pub struct PersonalityStore {
    pool: SqlitePool,
}

impl PersonalityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All personalities in insertion order.
    pub async fn list(&self) -> Result<Vec<Personality>> {
        let rows = sqlx::query(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(from_row).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Personality>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(from_row))
    }

    /// First personality with exactly this name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Personality>> {
        let row = sqlx::query(&format!(
            "{} WHERE personality_name = ? ORDER BY id ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(from_row))
    }

    pub async fn add(&self, input: &PersonalityInput) -> Result<Personality> {
        check_input(input)?;
        let result = sqlx::query(
            "INSERT INTO personalities (personality_name, system_prompt, system_prompt_rag, personality_title) VALUES (?, ?, ?, ?)",
        )
        .bind(&input.name)
        .bind(&input.system_prompt)
        .bind(&input.system_prompt_rag)
        .bind(&input.title)
        .execute(&self.pool)
        .await?;

        Ok(with_id(result.last_insert_rowid(), input))
    }

    pub async fn update(&self, id: i64, input: &PersonalityInput) -> Result<Personality> {
        check_input(input)?;
        let result = sqlx::query(
            "UPDATE personalities SET personality_name = ?, system_prompt = ?, system_prompt_rag = ?, personality_title = ? WHERE id = ?",
        )
        .bind(&input.name)
        .bind(&input.system_prompt)
        .bind(&input.system_prompt_rag)
        .bind(&input.title)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("personality {}", id)).into());
        }
        Ok(with_id(id, input))
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM personalities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RagError::NotFound(format!("personality {}", id)).into());
        }
        Ok(())
    }
}

fn from_row(row: &SqliteRow) -> Personality {
    Personality {
        id: row.get("id"),
        name: row.get("personality_name"),
        system_prompt: row.get("system_prompt"),
        system_prompt_rag: row.get("system_prompt_rag"),
        title: row.get("personality_title"),
    }
}

fn with_id(id: i64, input: &PersonalityInput) -> Personality {
    Personality {
        id,
        name: input.name.clone(),
        system_prompt: input.system_prompt.clone(),
        system_prompt_rag: input.system_prompt_rag.clone(),
        title: input.title.clone(),
    }
}

fn check_input(input: &PersonalityInput) -> Result<()> {
    if input.name.trim().is_empty() {
        return Err(RagError::InvalidInput("personality name must not be empty".into()).into());
    }
    for (field, value) in [("name", &input.name), ("title", &input.title)] {
        let len = value.chars().count();
        if len > MAX_LABEL_CHARS {
            return Err(RagError::InvalidInput(format!(
                "personality {} is {} characters, limit is {}",
                field, len, MAX_LABEL_CHARS
            ))
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> PersonalityStore {
        let pool = db::connect_path(&tmp.path().join("p.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        PersonalityStore::new(pool)
    }

    fn input(name: &str) -> PersonalityInput {
        PersonalityInput {
            name: name.into(),
            system_prompt: "You are helpful.".into(),
            system_prompt_rag: "Answer from:\n{context}".into(),
            title: format!("{} title", name),
        }
    }

    #[tokio::test]
    async fn update_changes_fields() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let p = s.add(&input("tutor")).await.unwrap();

        let mut changed = input("tutor");
        changed.system_prompt = "Be terse.".into();
        s.update(p.id, &changed).await.unwrap();

        let got = s.get(p.id).await.unwrap().unwrap();
        assert_eq!(got.system_prompt, "Be terse.");
        assert_eq!(s.find_by_name("tutor").await.unwrap().unwrap().id, p.id);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let err = s.update(42, &input("x")).await.unwrap_err();
        assert!(matches!(classify(&err), Some(RagError::NotFound(_))));
        let err = s.delete(42).await.unwrap_err();
        assert!(matches!(classify(&err), Some(RagError::NotFound(_))));
        assert!(s.get(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn long_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let err = s.add(&input(&"n".repeat(101))).await.unwrap_err();
        assert!(matches!(classify(&err), Some(RagError::InvalidInput(_))));
        assert!(s.list().await.unwrap().is_empty());

        let mut exact = input(&"é".repeat(100));
        exact.title = "t".into();
        assert!(s.add(&exact).await.is_ok());

        exact.title = "é".repeat(101);
        assert!(s.add(&exact).await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp).await;
        let a = s.add(&input("a")).await.unwrap();
        let b = s.add(&input("b")).await.unwrap();
        s.delete(a.id).await.unwrap();
        let names: Vec<_> = s.list().await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(names, vec![b.id]);
    }
}
