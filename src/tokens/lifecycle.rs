//! Bearer credential lifecycle: issue, validate, revoke, rotate.
//!
//! Each credential is tracked in the TTL cache under a digest of the raw token:
//!
//! - `access_token:<digest>` / `refresh_token:<digest>`: issued and still honored,
//!   TTL equal to the remaining validity.
//! - `blacklisted_token:<digest>`: revoked, TTL equal to the validity left at
//!   revocation time, so the entry never outlives the credential it blocks.
//!
//! A credential moves `Issued -> Blacklisted -> expired`, or `Issued -> expired`.
//! There is no way back from the blacklist.

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument};

use super::codec::{Claims, CodecError, TokenCodec};
use crate::cache::{CacheError, TtlCache};

const BLACKLIST_PREFIX: &str = "blacklisted_token:";
const ISSUED_MARKER: &[u8] = b"issued";
const BLACKLIST_MARKER: &[u8] = b"true";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    pub const ALL: [Self; 2] = [Self::Access, Self::Refresh];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn issued_prefix(self) -> &'static str {
        match self {
            Self::Access => "access_token:",
            Self::Refresh => "refresh_token:",
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim body of a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBody {
    pub sub: String,
    pub token_type: CredentialKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Why a presented credential is refused. Always terminal for that credential.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Token is invalid.")]
    Invalid,
    #[error("Token has expired.")]
    Expired,
    #[error("Token is not a {0} token.")]
    WrongKind(CredentialKind),
    #[error("Token is blacklisted.")]
    Blacklisted,
    #[error("Token was not issued or is no longer active.")]
    NotIssued,
    #[error("Tokens belong to different subjects.")]
    SubjectMismatch,
}

impl CredentialError {
    /// Short machine-readable reason.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::WrongKind(_) => "wrong_kind",
            Self::Blacklisted => "blacklisted",
            Self::NotIssued => "not_issued",
            Self::SubjectMismatch => "subject_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to sign credential: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Copy)]
pub struct CredentialTtls {
    pub access: Duration,
    pub refresh: Duration,
}

impl Default for CredentialTtls {
    fn default() -> Self {
        Self {
            access: Duration::from_secs(300),
            refresh: Duration::from_secs(86_400),
        }
    }
}

pub struct TokenLifecycle {
    codec: Arc<TokenCodec>,
    cache: Arc<dyn TtlCache>,
    ttls: CredentialTtls,
}

impl TokenLifecycle {
    #[must_use]
    pub fn new(codec: Arc<TokenCodec>, cache: Arc<dyn TtlCache>, ttls: CredentialTtls) -> Self {
        Self { codec, cache, ttls }
    }

    /// Mint an access/refresh pair for `subject` and record both as issued.
    ///
    /// # Errors
    /// Returns an error if signing fails or the cache cannot be written.
    #[instrument(skip(self))]
    pub async fn issue(&self, subject: &str) -> Result<TokenPair, LifecycleError> {
        let access = self.mint(subject, CredentialKind::Access).await?;
        let refresh = self.mint(subject, CredentialKind::Refresh).await?;
        debug!("Issued credential pair");
        Ok(TokenPair { access, refresh })
    }

    async fn mint(&self, subject: &str, kind: CredentialKind) -> Result<String, LifecycleError> {
        let ttl = match kind {
            CredentialKind::Access => self.ttls.access,
            CredentialKind::Refresh => self.ttls.refresh,
        };
        let body = CredentialBody {
            sub: subject.to_string(),
            token_type: kind,
        };
        let token = self.codec.sign(&body, ttl)?;
        let claims: Claims<CredentialBody> = self.codec.verify(&token)?;
        self.cache
            .set(&issued_key(kind, &token), ISSUED_MARKER, claims.remaining())
            .await?;
        Ok(token)
    }

    /// Check that `token` is a live credential of the given `kind`.
    ///
    /// # Errors
    /// Returns [`CredentialError`] when the token is invalid, expired, of the wrong
    /// kind, blacklisted, or unknown; a cache error when the store fails.
    pub async fn validate(
        &self,
        token: &str,
        kind: CredentialKind,
    ) -> Result<Claims<CredentialBody>, LifecycleError> {
        let claims: Claims<CredentialBody> =
            self.codec.verify(token).map_err(|err| match err {
                CodecError::Expired => CredentialError::Expired,
                _ => CredentialError::Invalid,
            })?;
        if claims.body.token_type != kind {
            return Err(CredentialError::WrongKind(kind).into());
        }
        if self.cache.get(&blacklist_key(token)).await?.is_some() {
            return Err(CredentialError::Blacklisted.into());
        }
        if self.cache.get(&issued_key(kind, token)).await?.is_none() {
            return Err(CredentialError::NotIssued.into());
        }
        Ok(claims)
    }

    /// Blacklist `token` for the rest of its issued lifetime.
    ///
    /// Returns `false` when there was nothing left to revoke (unknown, expired, or
    /// already revoked).
    ///
    /// # Errors
    /// Returns an error if the cache fails.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<bool, LifecycleError> {
        for kind in CredentialKind::ALL {
            let key = issued_key(kind, token);
            if let Some(remaining) = self.cache.ttl(&key).await? {
                self.cache
                    .set(&blacklist_key(token), BLACKLIST_MARKER, remaining)
                    .await?;
                self.cache.delete(&key).await?;
                debug!(kind = %kind, ?remaining, "Blacklisted credential");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Spend `old_refresh` and issue a new pair for the same subject.
    ///
    /// # Errors
    /// Returns [`CredentialError`] when `old_refresh` is not a live refresh token.
    #[instrument(skip_all)]
    pub async fn rotate(&self, old_refresh: &str) -> Result<TokenPair, LifecycleError> {
        let claims = self.validate(old_refresh, CredentialKind::Refresh).await?;
        self.revoke(old_refresh).await?;
        self.issue(&claims.body.sub).await
    }

    /// Revoke both halves of a session. Both tokens must be live and issued to
    /// the same subject.
    ///
    /// # Errors
    /// Returns [`CredentialError`] when either token is not live or the subjects
    /// differ; nothing is revoked in that case.
    #[instrument(skip_all)]
    pub async fn logout(&self, access: &str, refresh: &str) -> Result<(), LifecycleError> {
        let access_claims = self.validate(access, CredentialKind::Access).await?;
        let refresh_claims = self.validate(refresh, CredentialKind::Refresh).await?;
        if access_claims.body.sub != refresh_claims.body.sub {
            debug!("Logout refused: subjects differ");
            return Err(CredentialError::SubjectMismatch.into());
        }
        self.revoke(access).await?;
        self.revoke(refresh).await?;
        Ok(())
    }
}

fn token_digest(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

fn issued_key(kind: CredentialKind, token: &str) -> String {
    format!("{}{}", kind.issued_prefix(), token_digest(token))
}

fn blacklist_key(token: &str) -> String {
    format!("{BLACKLIST_PREFIX}{}", token_digest(token))
}
