//! Database repositories
//!
//! Repository pattern implementations for document access.
//! Each repository handles one collection; the helpers here load stored
//! documents and resolve `Populate` instructions across collections.

pub mod review;
pub mod tour;
pub mod user;

pub use review::{ReviewRepository, SqlxReviewRepository};
pub use tour::{SqlxTourRepository, TourRepository};
pub use user::{SqlxUserRepository, UserRepository};

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;

use crate::db::query::{get_path, Collection, Filter, FindQuery, Populate, PopulateSource};

fn parse_document(row: &sqlx::sqlite::SqliteRow) -> Result<Value> {
    let text: String = row.try_get("document")?;
    serde_json::from_str(&text).context("Stored document is not valid JSON")
}

/// Load every document of a collection in insertion order
pub(crate) async fn load_documents(pool: &SqlitePool, collection: Collection) -> Result<Vec<Value>> {
    let sql = format!("SELECT document FROM {} ORDER BY rowid", collection.table());
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load {}", collection.table()))?;

    rows.iter().map(parse_document).collect()
}

/// Load the documents with the given ids, keyed by id
pub(crate) async fn load_by_ids(
    pool: &SqlitePool,
    collection: Collection,
    ids: &[String],
) -> Result<HashMap<String, Value>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT id, document FROM {} WHERE id IN (", collection.table()));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id);
    }
    separated.push_unseparated(")");

    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load {} by id", collection.table()))?;

    let mut found = HashMap::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.try_get("id")?;
        found.insert(id, parse_document(row)?);
    }
    Ok(found)
}

/// Load the documents whose `column` holds one of `keys`, in insertion order
pub(crate) async fn load_by_foreign_key(
    pool: &SqlitePool,
    collection: Collection,
    column: &str,
    keys: &[String],
) -> Result<Vec<Value>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT document FROM {} WHERE {} IN (",
        collection.table(),
        column
    ));
    let mut separated = builder.separated(", ");
    for key in keys {
        separated.push_bind(key);
    }
    separated.push_unseparated(") ORDER BY rowid");

    let rows = builder
        .build()
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load {} by {}", collection.table(), column))?;

    rows.iter().map(parse_document).collect()
}

/// Documents a filter could match: the pinned row alone when the filter fixes
/// `id`, otherwise the whole collection
pub(crate) async fn load_candidates(
    pool: &SqlitePool,
    collection: Collection,
    filter: &Filter,
) -> Result<Vec<Value>> {
    match filter.pinned_id() {
        Some(id) => {
            let mut found = load_by_ids(pool, collection, &[id.to_string()]).await?;
            Ok(found.remove(id).into_iter().collect())
        }
        None => load_documents(pool, collection).await,
    }
}

fn id_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        Some(Value::String(id)) => vec![id.clone()],
        _ => Vec::new(),
    }
}

async fn populate_one(pool: &SqlitePool, docs: &mut [Value], populate: &Populate) -> Result<()> {
    let projection = populate.projection();

    match &populate.source {
        PopulateSource::Reference(collection) => {
            let mut ids: Vec<String> = Vec::new();
            for doc in docs.iter() {
                for id in id_list(get_path(doc, &populate.path)) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
            let found = load_by_ids(pool, *collection, &ids).await?;

            for doc in docs.iter_mut() {
                let resolved = match doc.get(&populate.path) {
                    Some(Value::Array(items)) => Value::Array(
                        items
                            .iter()
                            .filter_map(|v| v.as_str().and_then(|id| found.get(id)))
                            .map(|d| projection.apply(d.clone()))
                            .collect(),
                    ),
                    Some(Value::String(id)) => found
                        .get(id)
                        .map(|d| projection.apply(d.clone()))
                        .unwrap_or(Value::Null),
                    _ => continue,
                };
                if let Value::Object(map) = doc {
                    map.insert(populate.path.clone(), resolved);
                }
            }
        }
        PopulateSource::Virtual {
            collection,
            foreign_field,
        } => {
            let column = collection.foreign_key_column(foreign_field).with_context(|| {
                format!("No indexed column for '{}.{}'", collection.table(), foreign_field)
            })?;
            let parent_ids: Vec<String> = docs
                .iter()
                .filter_map(|d| d.get("id").and_then(Value::as_str).map(String::from))
                .collect();
            let related = load_by_foreign_key(pool, *collection, column, &parent_ids).await?;

            for doc in docs.iter_mut() {
                let Some(id) = doc.get("id").and_then(Value::as_str).map(String::from) else {
                    continue;
                };
                let children: Vec<Value> = related
                    .iter()
                    .filter(|r| get_path(r, foreign_field).and_then(Value::as_str) == Some(id.as_str()))
                    .map(|r| projection.apply(r.clone()))
                    .collect();
                if let Value::Object(map) = doc {
                    map.insert(populate.path.clone(), Value::Array(children));
                }
            }
        }
    }

    Ok(())
}

/// Resolve populate instructions, then apply the projection
pub(crate) async fn finish_documents(
    pool: &SqlitePool,
    mut docs: Vec<Value>,
    query: &FindQuery,
) -> Result<Vec<Value>> {
    for populate in &query.populate {
        if query.projection.keeps(&populate.path) {
            populate_one(pool, &mut docs, populate)
                .await
                .with_context(|| format!("Failed to populate '{}'", populate.path))?;
        }
    }

    Ok(docs.into_iter().map(|d| query.projection.apply(d)).collect())
}
