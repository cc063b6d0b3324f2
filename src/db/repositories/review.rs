//! Review repository
//!
//! Reviews carry their tour id in a column so deleting a tour cascades.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::db::DynDatabasePool;
use crate::models::{CreateReviewInput, Review};

/// Review repository trait
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Create a review; the tour and user must exist
    async fn create(&self, input: &CreateReviewInput) -> Result<Review>;

    /// List reviews of a tour, oldest first
    async fn list_by_tour(&self, tour_id: &str) -> Result<Vec<Review>>;
}

/// SQLx-based review repository implementation
pub struct SqlxReviewRepository {
    pool: DynDatabasePool,
}

impl SqlxReviewRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ReviewRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl ReviewRepository for SqlxReviewRepository {
    async fn create(&self, input: &CreateReviewInput) -> Result<Review> {
        create_review_sqlite(self.pool.as_sqlite(), input).await
    }

    async fn list_by_tour(&self, tour_id: &str) -> Result<Vec<Review>> {
        list_reviews_by_tour_sqlite(self.pool.as_sqlite(), tour_id).await
    }
}

async fn create_review_sqlite(pool: &SqlitePool, input: &CreateReviewInput) -> Result<Review> {
    let review = Review {
        id: uuid::Uuid::new_v4().to_string(),
        review: input.review.clone(),
        rating: input.rating,
        created_at: Utc::now(),
        tour: input.tour.clone(),
        user: input.user.clone(),
    };
    let document = serde_json::to_string(&review).context("Failed to serialize review")?;

    sqlx::query(
        r#"
        INSERT INTO reviews (id, tour_id, user_id, document, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&review.id)
    .bind(&review.tour)
    .bind(&review.user)
    .bind(&document)
    .bind(review.created_at)
    .execute(pool)
    .await
    .context("Failed to create review")?;

    Ok(review)
}

async fn list_reviews_by_tour_sqlite(pool: &SqlitePool, tour_id: &str) -> Result<Vec<Review>> {
    let rows = sqlx::query("SELECT document FROM reviews WHERE tour_id = ? ORDER BY rowid")
        .bind(tour_id)
        .fetch_all(pool)
        .await
        .context("Failed to list reviews")?;

    rows.iter()
        .map(|row| -> Result<Review> {
            let text: String = row.try_get("document")?;
            serde_json::from_str(&text).context("Stored review is not valid JSON")
        })
        .collect()
}
