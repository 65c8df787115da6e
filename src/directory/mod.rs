//! User directory: the store of user records consulted by validators and written
//! by finalize actions.
//!
//! Emails are expected to be normalized (trimmed, lowercased) by the caller.

mod memory;
mod postgres;

pub use memory::MemoryDirectory;
pub use postgres::PgDirectory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    /// Argon2 PHC string; `None` for accounts created through a third party.
    pub password_hash: Option<String>,
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("user already exists: {0}")]
    Conflict(String),
    #[error("user not found: {0}")]
    NotFound(Uuid),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn exists_by_email(&self, email: &str) -> Result<bool, DirectoryError>;

    /// Usernames are unique regardless of case.
    async fn exists_by_username(&self, username: &str) -> Result<bool, DirectoryError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DirectoryError>;

    async fn create(&self, user: NewUser) -> Result<User, DirectoryError>;

    async fn update(&self, user: &User, fields: UserUpdate) -> Result<User, DirectoryError>;

    async fn ping(&self) -> Result<(), DirectoryError>;

    fn backend(&self) -> &'static str;
}

/// Postgres when a DSN is configured, in-process otherwise.
///
/// # Errors
/// Returns an error if the Postgres pool cannot be created.
pub async fn connect(dsn: Option<&SecretString>) -> Result<Arc<dyn UserDirectory>, DirectoryError> {
    match dsn {
        Some(dsn) => Ok(Arc::new(PgDirectory::connect(dsn.expose_secret()).await?)),
        None => Ok(Arc::new(MemoryDirectory::new())),
    }
}
