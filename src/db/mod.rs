//! Database layer
//!
//! Tours, users and reviews are persisted as JSON documents in SQLite.
//! Querying is declarative:
//! - `query` describes finds (filter, sort, window, populate, projection)
//! - `pipeline` describes aggregations
//! - `repositories` evaluate both against the stored documents
//!
//! # Usage
//!
//! ```ignore
//! use natours::config::DatabaseConfig;
//! use natours::db::{create_pool, migrations, SqlxTourRepository};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//!
//! let tours = SqlxTourRepository::boxed(pool.clone());
//! ```

pub mod geo;
pub mod migrations;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod repositories;

pub use pipeline::{Accumulator, Expr, Pipeline, PipelineError, Stage};
pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool, SqliteDatabase};
pub use query::{Collection, Condition, Filter, FindQuery, Populate, PopulateSource, Projection, SortSpec};
pub use repositories::{
    ReviewRepository, SqlxReviewRepository, SqlxTourRepository, SqlxUserRepository, TourRepository,
    UserRepository,
};

/// A write collided with a unique index
///
/// Carried inside `anyhow::Error` so callers can downcast it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Duplicate field value: {field} = {value:?}")]
pub struct DuplicateKeyError {
    pub field: String,
    pub value: String,
}

/// Map a unique-index violation to `DuplicateKeyError`, anything else to itself
pub(crate) fn map_unique_violation(err: sqlx::Error, field: &str, value: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DuplicateKeyError {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into(),
        _ => err.into(),
    }
}
