//! Steps: one named unit of validation plus an output transform.

use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use rand::rngs::OsRng;
use std::{fmt, sync::Arc};
use thiserror::Error;

use super::accumulator::Accumulator;
use super::validators::{FieldValidator, RecordValidator, StepFailure};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to hash sensitive value")]
    Hash,
}

/// Applied to a value after it passed validation, before it is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Trim and lowercase.
    NormalizeEmail,
    /// Argon2id PHC string with a random salt.
    HashPassword,
}

impl Transform {
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn apply(self, value: &str) -> Result<String, TransformError> {
        match self {
            Self::Identity => Ok(value.to_string()),
            Self::NormalizeEmail => Ok(normalize_email(value)),
            Self::HashPassword => {
                let salt = SaltString::generate(&mut OsRng);
                Argon2::default()
                    .hash_password(value.as_bytes(), &salt)
                    .map(|hash| hash.to_string())
                    .map_err(|_| TransformError::Hash)
            }
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Clone)]
pub(crate) enum Check {
    Field(Arc<dyn FieldValidator>),
    Record(Arc<dyn RecordValidator>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Plain,
    /// Carries a secret; its recorded value is always hashed.
    Sensitive,
    /// Re-validates the whole accumulator and hands it to the finalizer.
    Terminal,
}

#[derive(Clone)]
pub struct Step {
    name: String,
    kind: StepKind,
    check: Check,
    transform: Transform,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("transform", &self.transform)
            .finish_non_exhaustive()
    }
}

impl Step {
    pub fn field(name: impl Into<String>, validator: impl FieldValidator + 'static) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Plain,
            check: Check::Field(Arc::new(validator)),
            transform: Transform::Identity,
        }
    }

    pub fn sensitive(name: impl Into<String>, validator: impl FieldValidator + 'static) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Sensitive,
            check: Check::Field(Arc::new(validator)),
            transform: Transform::HashPassword,
        }
    }

    pub fn terminal(name: impl Into<String>, validator: impl RecordValidator + 'static) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Terminal,
            check: Check::Record(Arc::new(validator)),
            transform: Transform::Identity,
        }
    }

    /// Override the output transform. Sensitive steps keep hashing.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        if self.kind != StepKind::Sensitive {
            self.transform = transform;
        }
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind == StepKind::Terminal
    }

    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        self.kind == StepKind::Sensitive
    }

    #[must_use]
    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Validate one submitted value against this step.
    ///
    /// A terminal step accepts no further values.
    ///
    /// # Errors
    /// [`StepFailure::Invalid`] when the value is refused; other variants when a
    /// collaborator failed.
    pub async fn validate_value(&self, value: &str, accumulated: &Accumulator) -> Result<(), StepFailure> {
        match &self.check {
            Check::Field(validator) => validator.validate(value, accumulated).await,
            Check::Record(_) => Err(StepFailure::Invalid(
                "No further values are accepted at the final step.".to_string(),
            )),
        }
    }

    /// Re-validate the whole record. Only terminal steps carry a record check;
    /// other steps accept any record.
    ///
    /// # Errors
    /// Same as [`Step::validate_value`].
    pub async fn validate_record(&self, accumulated: &Accumulator) -> Result<(), StepFailure> {
        match &self.check {
            Check::Record(validator) => validator.validate(accumulated).await,
            Check::Field(_) => Ok(()),
        }
    }
}
