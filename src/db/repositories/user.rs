//! User repository
//!
//! Database operations for users. Only what guide population needs:
//! creating users and looking them up.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::db::{map_unique_violation, DynDatabasePool};
use crate::models::{CreateUserInput, User};

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Create a new user
    async fn create(&self, input: &CreateUserInput) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<User>>;
}

/// SQLx-based user repository implementation
pub struct SqlxUserRepository {
    pool: DynDatabasePool,
}

impl SqlxUserRepository {
    /// Create a new SQLx user repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn UserRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, input: &CreateUserInput) -> Result<User> {
        create_user_sqlite(self.pool.as_sqlite(), input).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        get_user_by_id_sqlite(self.pool.as_sqlite(), id).await
    }
}

async fn create_user_sqlite(pool: &SqlitePool, input: &CreateUserInput) -> Result<User> {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        name: input.name.trim().to_string(),
        email: input.email.trim().to_lowercase(),
        photo: input.photo.clone().unwrap_or_else(|| "default.jpg".to_string()),
        role: input.role,
        password_changed_at: input.password_changed_at,
        active: true,
    };
    let document = serde_json::to_string(&user).context("Failed to serialize user")?;

    sqlx::query("INSERT INTO users (id, email, document, created_at) VALUES (?, ?, ?, ?)")
        .bind(&user.id)
        .bind(&user.email)
        .bind(&document)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map_err(|e| map_unique_violation(e, "email", &user.email))
        .context("Failed to create user")?;

    Ok(user)
}

async fn get_user_by_id_sqlite(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let row = sqlx::query("SELECT document FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get user by ID")?;

    match row {
        Some(row) => {
            let text: String = row.try_get("document")?;
            let user = serde_json::from_str(&text).context("Stored user is not valid JSON")?;
            Ok(Some(user))
        }
        None => Ok(None),
    }
}
