//! Finalize actions run once a transaction passes its terminal step.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use super::accumulator::Accumulator;
use crate::directory::{DirectoryError, NewUser, UserDirectory, UserUpdate};
use crate::tokens::{CredentialKind, LifecycleError, TokenLifecycle};

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("No user found with this email.")]
    UnknownUser,
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl FinalizeError {
    /// Refusals the caller can act on, reported under the terminal step.
    /// Everything else is an internal failure.
    #[must_use]
    pub fn rejection(&self) -> Option<String> {
        match self {
            Self::MissingField(field) => Some(format!("Field '{field}' cannot be empty.")),
            Self::UnknownUser => Some(self.to_string()),
            Self::Directory(DirectoryError::Conflict(_)) => {
                Some("User already exists.".to_string())
            }
            Self::Lifecycle(LifecycleError::Credential(err)) => Some(err.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError>;
}

fn field<'a>(record: &'a Accumulator, name: &'static str) -> Result<&'a str, FinalizeError> {
    record
        .get(name)
        .filter(|value| !value.is_empty())
        .ok_or(FinalizeError::MissingField(name))
}

/// Create the user from `username`, `email` and the hashed `password`.
pub struct CreateUser {
    directory: Arc<dyn UserDirectory>,
}

impl CreateUser {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Finalizer for CreateUser {
    #[instrument(skip_all)]
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let user = self
            .directory
            .create(NewUser {
                username: field(record, "username")?.to_string(),
                email: field(record, "email")?.to_string(),
                password_hash: Some(field(record, "password")?.to_string()),
            })
            .await?;
        info!(user_id = %user.id, "User created");
        Ok(serde_json::to_value(user)?)
    }
}

/// Create a password-less user for a third-party identity. The username is
/// derived from the display name and made unique with a numeric suffix.
pub struct CreateThirdPartyUser {
    directory: Arc<dyn UserDirectory>,
}

impl CreateThirdPartyUser {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    async fn free_username(&self, display_name: &str, email: &str) -> Result<String, FinalizeError> {
        let base = username_base(display_name, email);
        if !self.directory.exists_by_username(&base).await? {
            return Ok(base);
        }
        for suffix in 2..100u32 {
            let tail = format!("-{suffix}");
            let head: String = base.chars().take(30 - tail.len()).collect();
            let candidate = format!("{head}{tail}");
            if !self.directory.exists_by_username(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(DirectoryError::Conflict(base).into())
    }
}

/// Username-safe form of `display_name`, falling back to the email local part.
fn username_base(display_name: &str, email: &str) -> String {
    let slug = |raw: &str| -> String {
        raw.trim()
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
            .take(30)
            .collect()
    };
    let mut base = slug(display_name);
    if base.chars().count() < 3 {
        base = slug(email.split('@').next().unwrap_or_default());
    }
    while base.chars().count() < 3 {
        base.push('_');
    }
    base
}

#[async_trait]
impl Finalizer for CreateThirdPartyUser {
    #[instrument(skip_all)]
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let email = field(record, "email")?;
        let display_name = record.get("username").unwrap_or_default();
        let username = self.free_username(display_name, email).await?;
        let user = self
            .directory
            .create(NewUser {
                username,
                email: email.to_string(),
                password_hash: None,
            })
            .await?;
        info!(user_id = %user.id, "Third-party user created");
        Ok(serde_json::to_value(user)?)
    }
}

/// Replace the password hash of the user named by `email`.
pub struct ResetPassword {
    directory: Arc<dyn UserDirectory>,
}

impl ResetPassword {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl Finalizer for ResetPassword {
    #[instrument(skip_all)]
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let email = field(record, "email")?;
        let user = self
            .directory
            .get_by_email(email)
            .await?
            .ok_or(FinalizeError::UnknownUser)?;
        let user = self
            .directory
            .update(
                &user,
                UserUpdate {
                    password_hash: Some(field(record, "password")?.to_string()),
                    ..UserUpdate::default()
                },
            )
            .await?;
        info!(user_id = %user.id, "Password reset");
        Ok(serde_json::to_value(user)?)
    }
}

/// Issue a credential pair for the user named by `email`.
pub struct IssueTokens {
    directory: Arc<dyn UserDirectory>,
    lifecycle: Arc<TokenLifecycle>,
}

impl IssueTokens {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, lifecycle: Arc<TokenLifecycle>) -> Self {
        Self {
            directory,
            lifecycle,
        }
    }
}

#[async_trait]
impl Finalizer for IssueTokens {
    #[instrument(skip_all)]
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let email = field(record, "email")?;
        let user = self
            .directory
            .get_by_email(email)
            .await?
            .ok_or(FinalizeError::UnknownUser)?;
        let pair = self.lifecycle.issue(&user.id.to_string()).await?;
        Ok(json!({
            "access": pair.access,
            "refresh": pair.refresh,
            "email": user.email,
        }))
    }
}

/// Spend the accumulated `refresh` credential and issue a new pair.
pub struct RotateTokens {
    lifecycle: Arc<TokenLifecycle>,
}

impl RotateTokens {
    #[must_use]
    pub fn new(lifecycle: Arc<TokenLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Finalizer for RotateTokens {
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let pair = self.lifecycle.rotate(field(record, "refresh")?).await?;
        Ok(serde_json::to_value(pair)?)
    }
}

/// Report the subject and expiry of the accumulated `access` credential.
pub struct DescribeCredential {
    lifecycle: Arc<TokenLifecycle>,
}

impl DescribeCredential {
    #[must_use]
    pub fn new(lifecycle: Arc<TokenLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Finalizer for DescribeCredential {
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        let claims = self
            .lifecycle
            .validate(field(record, "access")?, CredentialKind::Access)
            .await?;
        Ok(json!({
            "valid": true,
            "sub": claims.body.sub,
            "token_type": claims.body.token_type,
            "exp": claims.exp,
        }))
    }
}

/// Revoke the accumulated `access` and `refresh` credentials.
pub struct RevokeTokens {
    lifecycle: Arc<TokenLifecycle>,
}

impl RevokeTokens {
    #[must_use]
    pub fn new(lifecycle: Arc<TokenLifecycle>) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Finalizer for RevokeTokens {
    #[instrument(skip_all)]
    async fn finalize(&self, record: &Accumulator) -> Result<Value, FinalizeError> {
        self.lifecycle
            .logout(field(record, "access")?, field(record, "refresh")?)
            .await?;
        Ok(json!({ "message": "Logout successful. Tokens invalidated." }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::directory::MemoryDirectory;
    use crate::tokens::{CredentialTtls, TokenCodec};
    use anyhow::Result;

    fn lifecycle() -> Arc<TokenLifecycle> {
        Arc::new(TokenLifecycle::new(
            Arc::new(TokenCodec::from_seed([4u8; 32])),
            Arc::new(MemoryCache::new()),
            CredentialTtls::default(),
        ))
    }

    #[test]
    fn username_base_slugs_display_name() {
        assert_eq!(username_base("Alice W", "bob@example.com"), "Alice_W");
        assert_eq!(username_base("Zoë", "bob@example.com"), "bob");
        assert_eq!(username_base("", "b@example.com"), "b__");
        assert_eq!(username_base(&"x".repeat(40), "b@example.com").len(), 30);
    }

    #[tokio::test]
    async fn create_user_requires_fields() -> Result<()> {
        let finalizer = CreateUser::new(Arc::new(MemoryDirectory::new()));
        let record: Accumulator = [("username", "alice_w"), ("email", "bob@example.com")]
            .into_iter()
            .collect();
        let err = finalizer.finalize(&record).await.err();
        assert!(matches!(err, Some(FinalizeError::MissingField("password"))));
        assert_eq!(
            err.and_then(|e| e.rejection()).as_deref(),
            Some("Field 'password' cannot be empty.")
        );
        Ok(())
    }

    #[tokio::test]
    async fn third_party_user_gets_free_username() -> Result<()> {
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::new());
        directory
            .create(NewUser {
                username: "Alice_W".to_string(),
                email: "carol@example.com".to_string(),
                password_hash: None,
            })
            .await?;

        let finalizer = CreateThirdPartyUser::new(directory.clone());
        let record: Accumulator = [("email", "bob@example.com"), ("username", "Alice W")]
            .into_iter()
            .collect();
        let created = finalizer.finalize(&record).await?;
        assert_eq!(created["username"], "Alice_W-2");
        assert_eq!(created["email"], "bob@example.com");
        assert!(created.get("password_hash").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_updates_hash() -> Result<()> {
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::new());
        directory
            .create(NewUser {
                username: "alice_w".to_string(),
                email: "bob@example.com".to_string(),
                password_hash: Some("old".to_string()),
            })
            .await?;

        let finalizer = ResetPassword::new(directory.clone());
        let record: Accumulator = [("email", "bob@example.com"), ("password", "new")]
            .into_iter()
            .collect();
        finalizer.finalize(&record).await?;

        let user = directory.get_by_email("bob@example.com").await?;
        assert_eq!(user.and_then(|u| u.password_hash).as_deref(), Some("new"));

        let record: Accumulator = [("email", "carol@example.com"), ("password", "new")]
            .into_iter()
            .collect();
        assert!(matches!(
            finalizer.finalize(&record).await,
            Err(FinalizeError::UnknownUser)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn token_finalizers() -> Result<()> {
        let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::new());
        let user = directory
            .create(NewUser {
                username: "alice_w".to_string(),
                email: "bob@example.com".to_string(),
                password_hash: None,
            })
            .await?;
        let lifecycle = lifecycle();

        let issued = IssueTokens::new(directory, lifecycle.clone())
            .finalize(&[("email", "bob@example.com")].into_iter().collect())
            .await?;
        let access = issued["access"].as_str().unwrap_or_default().to_string();
        let refresh = issued["refresh"].as_str().unwrap_or_default().to_string();

        let described = DescribeCredential::new(lifecycle.clone())
            .finalize(&[("access", access.as_str())].into_iter().collect())
            .await?;
        assert_eq!(described["sub"], user.id.to_string());
        assert_eq!(described["token_type"], "access");

        let rotated = RotateTokens::new(lifecycle.clone())
            .finalize(&[("refresh", refresh.as_str())].into_iter().collect())
            .await?;
        assert_ne!(rotated["refresh"], refresh.as_str());

        let again = RotateTokens::new(lifecycle.clone())
            .finalize(&[("refresh", refresh.as_str())].into_iter().collect())
            .await
            .err();
        assert_eq!(
            again.and_then(|e| e.rejection()).as_deref(),
            Some("Token is blacklisted.")
        );

        let new_access = rotated["access"].as_str().unwrap_or_default();
        let new_refresh = rotated["refresh"].as_str().unwrap_or_default();
        let logged_out = RevokeTokens::new(lifecycle)
            .finalize(
                &[("access", new_access), ("refresh", new_refresh)]
                    .into_iter()
                    .collect(),
            )
            .await?;
        assert_eq!(
            logged_out["message"],
            "Logout successful. Tokens invalidated."
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoke_tokens_refuses_mixed_sessions() -> Result<()> {
        let lifecycle = lifecycle();
        let alice = lifecycle.issue("alice").await?;
        let mallory = lifecycle.issue("mallory").await?;

        let err = RevokeTokens::new(lifecycle.clone())
            .finalize(
                &[("access", mallory.access.as_str()), ("refresh", alice.refresh.as_str())]
                    .into_iter()
                    .collect(),
            )
            .await
            .err();
        assert_eq!(
            err.and_then(|e| e.rejection()).as_deref(),
            Some("Tokens belong to different subjects.")
        );
        lifecycle
            .validate(&alice.refresh, CredentialKind::Refresh)
            .await?;
        Ok(())
    }
}
