//! Step validators.
//!
//! A [`FieldValidator`] checks one submitted value, optionally against what the
//! transaction accumulated so far. A [`RecordValidator`] re-checks the whole
//! accumulator at the terminal step. Validators never mutate shared state; the only
//! side effects are read-only lookups in the user directory and the credential cache.
//!
//! Refusals are [`StepFailure::Invalid`] with a human-readable reason. Every other
//! variant is a collaborator failure and must not be reported as a validation error.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;

use super::accumulator::Accumulator;
use super::step::normalize_email;
use crate::cache::CacheError;
use crate::directory::{DirectoryError, UserDirectory};
use crate::tokens::{CodecError, CredentialKind, LifecycleError, TokenLifecycle};

#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("stored password hash is unreadable")]
    Hash,
}

impl StepFailure {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

impl From<LifecycleError> for StepFailure {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Credential(err) => Self::Invalid(err.to_string()),
            LifecycleError::Cache(err) => Self::Cache(err),
            LifecycleError::Codec(err) => Self::Codec(err),
        }
    }
}

#[async_trait]
pub trait FieldValidator: Send + Sync {
    async fn validate(&self, value: &str, accumulated: &Accumulator) -> Result<(), StepFailure>;
}

#[async_trait]
pub trait RecordValidator: Send + Sync {
    async fn validate(&self, accumulated: &Accumulator) -> Result<(), StepFailure>;
}

fn matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|regex| regex.is_match(value))
}

pub struct UsernameValidator {
    directory: Arc<dyn UserDirectory>,
}

impl UsernameValidator {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl FieldValidator for UsernameValidator {
    async fn validate(&self, value: &str, _: &Accumulator) -> Result<(), StepFailure> {
        if !(3..=30).contains(&value.chars().count()) {
            return Err(StepFailure::invalid("Username must be 3-30 characters."));
        }
        if !matches(r"^[a-zA-Z0-9_.-]+$", value) {
            return Err(StepFailure::invalid(
                "Username can only contain letters, numbers, underscores, dots, or hyphens.",
            ));
        }
        if self.directory.exists_by_username(value).await? {
            return Err(StepFailure::invalid("Username is already taken."));
        }
        Ok(())
    }
}

/// Whether the email must be new (registration) or already known (login, reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailMode {
    Create,
    Exists,
}

pub struct EmailValidator {
    directory: Arc<dyn UserDirectory>,
    mode: EmailMode,
}

impl EmailValidator {
    #[must_use]
    pub fn create(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            mode: EmailMode::Create,
        }
    }

    #[must_use]
    pub fn exists(directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            directory,
            mode: EmailMode::Exists,
        }
    }
}

#[async_trait]
impl FieldValidator for EmailValidator {
    async fn validate(&self, value: &str, _: &Accumulator) -> Result<(), StepFailure> {
        let email = normalize_email(value);
        match self.mode {
            EmailMode::Create => {
                if !matches(r"^[\w\.-]+@[\w\.-]+\.\w+$", &email) {
                    return Err(StepFailure::invalid("Invalid email address."));
                }
                if self.directory.exists_by_email(&email).await? {
                    return Err(StepFailure::invalid("Email is already registered."));
                }
            }
            EmailMode::Exists => {
                if email.is_empty() || !self.directory.exists_by_email(&email).await? {
                    return Err(StepFailure::invalid("No user found with this email."));
                }
            }
        }
        Ok(())
    }
}

pub struct PasswordStrength;

#[async_trait]
impl FieldValidator for PasswordStrength {
    async fn validate(&self, value: &str, _: &Accumulator) -> Result<(), StepFailure> {
        if value.chars().count() < 8 {
            return Err(StepFailure::invalid("Password must be at least 8 characters."));
        }
        if !value.chars().any(|c| c.is_ascii_digit()) {
            return Err(StepFailure::invalid(
                "Password must contain at least one number.",
            ));
        }
        if !value.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(StepFailure::invalid(
                "Password must contain at least one uppercase letter.",
            ));
        }
        Ok(())
    }
}

fn verify_hash(value: &str, phc: &str) -> Result<bool, StepFailure> {
    let parsed = PasswordHash::new(phc).map_err(|_| StepFailure::Hash)?;
    Ok(Argon2::default()
        .verify_password(value.as_bytes(), &parsed)
        .is_ok())
}

/// The repeat must match the password accumulated under `field`. The accumulated
/// value is an Argon2 hash, so the comparison is a hash verification.
pub struct PasswordRepeat {
    field: &'static str,
}

impl PasswordRepeat {
    #[must_use]
    pub fn of(field: &'static str) -> Self {
        Self { field }
    }
}

#[async_trait]
impl FieldValidator for PasswordRepeat {
    async fn validate(&self, value: &str, accumulated: &Accumulator) -> Result<(), StepFailure> {
        let Some(hash) = accumulated.get(self.field) else {
            return Err(StepFailure::invalid("Passwords do not match."));
        };
        if verify_hash(value, hash)? {
            Ok(())
        } else {
            Err(StepFailure::invalid("Passwords do not match."))
        }
    }
}

/// Login password: must verify against the stored hash of the user whose email
/// was accumulated earlier in the transaction.
pub struct CredentialCheck {
    directory: Arc<dyn UserDirectory>,
    email_field: &'static str,
}

impl CredentialCheck {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, email_field: &'static str) -> Self {
        Self {
            directory,
            email_field,
        }
    }
}

#[async_trait]
impl FieldValidator for CredentialCheck {
    async fn validate(&self, value: &str, accumulated: &Accumulator) -> Result<(), StepFailure> {
        let refused = || StepFailure::invalid("Invalid email or password.");
        let Some(email) = accumulated.get(self.email_field) else {
            return Err(refused());
        };
        let Some(user) = self.directory.get_by_email(email).await? else {
            return Err(refused());
        };
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(refused());
        };
        if verify_hash(value, hash)? {
            Ok(())
        } else {
            Err(refused())
        }
    }
}

pub struct DisplayNameValidator;

#[async_trait]
impl FieldValidator for DisplayNameValidator {
    async fn validate(&self, value: &str, _: &Accumulator) -> Result<(), StepFailure> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(StepFailure::invalid("Display name cannot be empty."));
        }
        if trimmed.chars().count() > 150 {
            return Err(StepFailure::invalid(
                "Display name must be at most 150 characters.",
            ));
        }
        Ok(())
    }
}

/// Accepts a live bearer credential of the given kind.
pub struct CredentialValidator {
    lifecycle: Arc<TokenLifecycle>,
    kind: CredentialKind,
}

impl CredentialValidator {
    #[must_use]
    pub fn new(lifecycle: Arc<TokenLifecycle>, kind: CredentialKind) -> Self {
        Self { lifecycle, kind }
    }
}

#[async_trait]
impl FieldValidator for CredentialValidator {
    async fn validate(&self, value: &str, _: &Accumulator) -> Result<(), StepFailure> {
        self.lifecycle.validate(value, self.kind).await?;
        Ok(())
    }
}

fn require_non_empty(accumulated: &Accumulator) -> Result<(), StepFailure> {
    if accumulated.is_empty() {
        return Err(StepFailure::invalid("Data can't be empty."));
    }
    if let Some((key, _)) = accumulated.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(StepFailure::invalid(format!("Field '{key}' cannot be empty.")));
    }
    Ok(())
}

/// Every accumulated field is present and non-empty.
pub struct NonEmptyRecord;

#[async_trait]
impl RecordValidator for NonEmptyRecord {
    async fn validate(&self, accumulated: &Accumulator) -> Result<(), StepFailure> {
        require_non_empty(accumulated)
    }
}

/// Non-empty record whose username and email are not near-duplicates.
pub struct RegistrationRecord;

#[async_trait]
impl RecordValidator for RegistrationRecord {
    async fn validate(&self, accumulated: &Accumulator) -> Result<(), StepFailure> {
        require_non_empty(accumulated)?;
        let (Some(username), Some(email)) = (accumulated.get("username"), accumulated.get("email"))
        else {
            return Err(StepFailure::invalid("Username and email must be provided."));
        };
        let username = username.to_lowercase();
        let email = email.to_lowercase();
        let local = email.split('@').next().unwrap_or_default();
        if email.contains(&username) || username.contains(local) {
            return Err(StepFailure::invalid("Username and email are too similar."));
        }
        Ok(())
    }
}

pub struct AcceptAll;

#[async_trait]
impl RecordValidator for AcceptAll {
    async fn validate(&self, _: &Accumulator) -> Result<(), StepFailure> {
        Ok(())
    }
}
