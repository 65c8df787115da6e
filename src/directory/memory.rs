use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DirectoryError, NewUser, User, UserDirectory, UserUpdate};

/// Directory kept in process memory. Used when no DSN is configured and in tests.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_username(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn exists_by_email(&self, email: &str) -> Result<bool, DirectoryError> {
        Ok(self.get_by_email(email).await?.is_some())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, DirectoryError> {
        let users = self.users.read().await;
        Ok(users.values().any(|user| same_username(&user.username, username)))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User, DirectoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(DirectoryError::Conflict(user.email));
        }
        if users
            .values()
            .any(|existing| same_username(&existing.username, &user.username))
        {
            return Err(DirectoryError::Conflict(user.username));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User, fields: UserUpdate) -> Result<User, DirectoryError> {
        let mut users = self.users.write().await;
        if let Some(username) = &fields.username {
            if users
                .values()
                .any(|existing| existing.id != user.id && same_username(&existing.username, username))
            {
                return Err(DirectoryError::Conflict(username.clone()));
            }
        }
        let stored = users
            .get_mut(&user.id)
            .ok_or(DirectoryError::NotFound(user.id))?;
        if let Some(username) = fields.username {
            stored.username = username;
        }
        if let Some(password_hash) = fields.password_hash {
            stored.password_hash = Some(password_hash);
        }
        Ok(stored.clone())
    }

    async fn ping(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
