//! Tour repository
//!
//! Database operations for tours.
//!
//! This module provides:
//! - `TourRepository` trait defining the interface for tour document access
//! - `SqlxTourRepository` implementing the trait for SQLite
//!
//! `name` and `slug` are mirrored into columns so the unique index on name is
//! enforced by the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::{finish_documents, load_candidates, load_documents};
use crate::db::pipeline::Pipeline;
use crate::db::query::{Collection, Filter, FindQuery};
use crate::db::{map_unique_violation, DynDatabasePool};

/// Tour repository trait
#[async_trait]
pub trait TourRepository: Send + Sync {
    /// Insert a complete tour document and return it
    async fn insert(&self, doc: &Value) -> Result<Value>;

    /// Run a find query
    async fn find(&self, query: &FindQuery) -> Result<Vec<Value>>;

    /// Merge `patch` into the first document matching the query's filter
    ///
    /// Returns the updated document, populated and projected per the query.
    async fn update_one(&self, query: &FindQuery, patch: &Map<String, Value>) -> Result<Option<Value>>;

    /// Delete the first document matching the query's filter and return it
    async fn delete_one(&self, query: &FindQuery) -> Result<Option<Value>>;

    /// Run an aggregation pipeline over all tours
    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>>;
}

/// SQLx-based tour repository implementation
pub struct SqlxTourRepository {
    pool: DynDatabasePool,
}

impl SqlxTourRepository {
    /// Create a new SQLx tour repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TourRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TourRepository for SqlxTourRepository {
    async fn insert(&self, doc: &Value) -> Result<Value> {
        insert_tour_sqlite(self.pool.as_sqlite(), doc).await
    }

    async fn find(&self, query: &FindQuery) -> Result<Vec<Value>> {
        let pool = self.pool.as_sqlite();
        let docs = query.select(load_candidates(pool, Collection::Tours, &query.filter).await?);
        finish_documents(pool, docs, query).await
    }

    async fn update_one(&self, query: &FindQuery, patch: &Map<String, Value>) -> Result<Option<Value>> {
        let pool = self.pool.as_sqlite();
        let Some(mut doc) = first_match(pool, &query.filter).await? else {
            return Ok(None);
        };

        if let Value::Object(map) = &mut doc {
            for (key, value) in patch {
                map.insert(key.clone(), value.clone());
            }
        }
        update_tour_sqlite(pool, &doc).await?;

        let mut finished = finish_documents(pool, vec![doc], query).await?;
        Ok(finished.pop())
    }

    async fn delete_one(&self, query: &FindQuery) -> Result<Option<Value>> {
        let pool = self.pool.as_sqlite();
        let Some(doc) = first_match(pool, &query.filter).await? else {
            return Ok(None);
        };

        delete_tour_sqlite(pool, document_str(&doc, "id")?).await?;
        Ok(Some(doc))
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let docs = load_documents(self.pool.as_sqlite(), Collection::Tours).await?;
        let results = pipeline.run(docs).context("Failed to run aggregation")?;
        Ok(results)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

fn document_str<'a>(doc: &'a Value, field: &str) -> Result<&'a str> {
    doc.get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("Tour document has no string '{}'", field))
}

async fn first_match(pool: &SqlitePool, filter: &Filter) -> Result<Option<Value>> {
    let docs = load_candidates(pool, Collection::Tours, filter).await?;
    Ok(docs.into_iter().find(|d| filter.matches(d)))
}

async fn insert_tour_sqlite(pool: &SqlitePool, doc: &Value) -> Result<Value> {
    let id = document_str(doc, "id")?;
    let name = document_str(doc, "name")?;
    let slug = doc.get("slug").and_then(Value::as_str).unwrap_or_default();
    let document = serde_json::to_string(doc).context("Failed to serialize tour")?;

    sqlx::query(
        r#"
        INSERT INTO tours (id, name, slug, document, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(slug)
    .bind(&document)
    .bind(Utc::now())
    .execute(pool)
    .await
    .map_err(|e| map_unique_violation(e, "name", name))
    .context("Failed to insert tour")?;

    Ok(doc.clone())
}

async fn update_tour_sqlite(pool: &SqlitePool, doc: &Value) -> Result<()> {
    let id = document_str(doc, "id")?;
    let name = document_str(doc, "name")?;
    let slug = doc.get("slug").and_then(Value::as_str).unwrap_or_default();
    let document = serde_json::to_string(doc).context("Failed to serialize tour")?;

    sqlx::query("UPDATE tours SET name = ?, slug = ?, document = ? WHERE id = ?")
        .bind(name)
        .bind(slug)
        .bind(&document)
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| map_unique_violation(e, "name", name))
        .context("Failed to update tour")?;

    Ok(())
}

async fn delete_tour_sqlite(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM tours WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete tour")?;
    Ok(())
}
