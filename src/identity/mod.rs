//! Third-party identity claims.
//!
//! Providers are registered in an [`IdentityProviders`] table at startup, keyed by
//! [`ProviderKind`]; requests name the provider as a string.

mod google;

pub use google::{GOOGLE_TOKENINFO_URL, GoogleProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// Claims returned by a provider for a verified third-party token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unsupported provider: {0}")]
    UnknownProvider(String),
    #[error("Invalid {0} token")]
    Rejected(ProviderKind),
    #[error("{0} response is missing the email claim")]
    MissingEmail(ProviderKind),
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl IdentityError {
    /// `true` when the provider answered but refused the token, as opposed to
    /// the provider being unreachable.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Http(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Google,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            other => Err(IdentityError::UnknownProvider(other.to_string())),
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn fetch_identity(&self, token: &str) -> Result<Identity, IdentityError>;
}

/// Dispatch table from provider tag to strategy.
#[derive(Default, Clone)]
pub struct IdentityProviders {
    providers: HashMap<ProviderKind, Arc<dyn IdentityProvider>>,
}

impl IdentityProviders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: ProviderKind, provider: Arc<dyn IdentityProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    #[must_use]
    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    /// # Errors
    /// Returns an error when `provider` is unknown or not registered, or the
    /// provider refuses the token.
    pub async fn fetch_identity(&self, provider: &str, token: &str) -> Result<Identity, IdentityError> {
        let kind: ProviderKind = provider.parse()?;
        let strategy = self
            .providers
            .get(&kind)
            .ok_or_else(|| IdentityError::UnknownProvider(kind.to_string()))?;
        strategy.fetch_identity(token).await
    }
}
