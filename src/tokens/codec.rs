//! Compact signed tokens (`header.claims.signature`, base64url, `EdDSA`).
//!
//! One codec signs both continuation tokens and bearer credentials; the claim body
//! type tells them apart.

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::{fmt, time::Duration};
use thiserror::Error;
use ulid::Ulid;

const ALG: &str = "EdDSA";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid token ttl")]
    InvalidTtl,
    #[error("invalid signing key")]
    InvalidKey,
    #[error("failed to generate signing key")]
    KeyGeneration,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

/// Registered claims wrapped around a token-specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims<T> {
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Claims<T> {
    /// Seconds of validity left at `now`, zero once expired.
    #[must_use]
    pub fn remaining_at(&self, now: i64) -> Duration {
        u64::try_from(self.exp.saturating_sub(now))
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.remaining_at(Utc::now().timestamp())
    }
}

pub struct TokenCodec {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    kid: String,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let verifying_key = signing_key.verifying_key();
        let digest = Sha256::digest(verifying_key.as_bytes());
        let kid = Base64UrlUnpadded::encode_string(&digest[..8]);
        Self {
            signing_key,
            verifying_key,
            kid,
        }
    }

    /// Build a codec from a base64url (unpadded) encoded 32-byte seed.
    ///
    /// # Errors
    /// Returns an error if the seed is not valid base64url or not 32 bytes long.
    pub fn from_base64_seed(seed: &SecretString) -> Result<Self, CodecError> {
        let bytes = Base64UrlUnpadded::decode_vec(seed.expose_secret().trim())
            .map_err(|_| CodecError::Base64)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| CodecError::InvalidKey)?;
        Ok(Self::from_seed(seed))
    }

    /// Codec with a random key; tokens do not survive a restart.
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn ephemeral() -> Result<Self, CodecError> {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|_| CodecError::KeyGeneration)?;
        Ok(Self::from_seed(seed))
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `body` with an expiry `ttl` from now.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or the ttl overflows.
    pub fn sign<T: Serialize>(&self, body: &T, ttl: Duration) -> Result<String, CodecError> {
        self.sign_at(body, ttl, Utc::now().timestamp())
    }

    pub(crate) fn sign_at<T: Serialize>(
        &self,
        body: &T,
        ttl: Duration,
        now: i64,
    ) -> Result<String, CodecError> {
        let ttl = i64::try_from(ttl.as_secs()).map_err(|_| CodecError::InvalidTtl)?;
        let exp = now.checked_add(ttl).ok_or(CodecError::InvalidTtl)?;
        let claims = Claims {
            iat: now,
            exp,
            jti: Ulid::new().to_string(),
            body,
        };
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
            kid: self.kid.clone(),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let signature = self.signing_key.sign(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify signature and expiry, returning the decoded claims.
    ///
    /// # Errors
    /// Returns an error if the token is malformed, signed by another key, tampered
    /// with, or expired.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<Claims<T>, CodecError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    pub(crate) fn verify_at<T: DeserializeOwned>(
        &self,
        token: &str,
        now: i64,
    ) -> Result<Claims<T>, CodecError> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::TokenFormat);
        };

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(CodecError::UnsupportedAlg(header.alg));
        }
        if header.kid != self.kid {
            return Err(CodecError::UnknownKid(header.kid));
        }

        let signature_bytes =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| CodecError::Base64)?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| CodecError::InvalidSignature)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        self.verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| CodecError::InvalidSignature)?;

        let claims: Claims<T> = b64d_json(claims_b64)?;
        if claims.exp <= now {
            return Err(CodecError::Expired);
        }
        Ok(claims)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, CodecError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| CodecError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const NOW: i64 = 1_700_000_000;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Body {
        sub: String,
    }

    fn body() -> Body {
        Body {
            sub: "user-1".to_string(),
        }
    }

    #[test]
    fn sign_and_verify() -> Result<()> {
        let codec = TokenCodec::from_seed([7u8; 32]);
        let token = codec.sign_at(&body(), Duration::from_secs(60), NOW)?;
        let claims: Claims<Body> = codec.verify_at(&token, NOW + 30)?;
        assert_eq!(claims.body, body());
        assert_eq!(claims.exp, NOW + 60);
        assert_eq!(claims.remaining_at(NOW + 30), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn tokens_differ_even_when_issued_in_the_same_second() -> Result<()> {
        let codec = TokenCodec::from_seed([7u8; 32]);
        let first = codec.sign_at(&body(), Duration::from_secs(60), NOW)?;
        let second = codec.sign_at(&body(), Duration::from_secs(60), NOW)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn verify_rejects_expired() -> Result<()> {
        let codec = TokenCodec::from_seed([7u8; 32]);
        let token = codec.sign_at(&body(), Duration::from_secs(60), NOW)?;
        let result = codec.verify_at::<Body>(&token, NOW + 60);
        assert!(matches!(result, Err(CodecError::Expired)));
        Ok(())
    }

    #[test]
    fn verify_rejects_other_key() -> Result<()> {
        let codec = TokenCodec::from_seed([7u8; 32]);
        let other = TokenCodec::from_seed([9u8; 32]);
        let token = other.sign_at(&body(), Duration::from_secs(60), NOW)?;
        let result = codec.verify_at::<Body>(&token, NOW);
        assert!(matches!(result, Err(CodecError::UnknownKid(kid)) if kid == other.kid()));
        Ok(())
    }

    #[test]
    fn verify_rejects_tampered_claims() -> Result<()> {
        let codec = TokenCodec::from_seed([7u8; 32]);
        let token = codec.sign_at(&body(), Duration::from_secs(60), NOW)?;
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = b64e_json(&Claims {
            iat: NOW,
            exp: NOW + 60,
            jti: "forged".to_string(),
            body: Body {
                sub: "admin".to_string(),
            },
        })?;
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        let result = codec.verify_at::<Body>(&forged, NOW);
        assert!(matches!(result, Err(CodecError::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn verify_rejects_malformed() {
        let codec = TokenCodec::from_seed([7u8; 32]);
        assert!(matches!(
            codec.verify_at::<Body>("only.two", NOW),
            Err(CodecError::TokenFormat)
        ));
        assert!(matches!(
            codec.verify_at::<Body>("a.b.c.d", NOW),
            Err(CodecError::TokenFormat)
        ));
        assert!(matches!(
            codec.verify_at::<Body>("!!.??.**", NOW),
            Err(CodecError::Base64)
        ));
    }

    #[test]
    fn from_base64_seed_checks_length() -> Result<()> {
        let seed = SecretString::from(Base64UrlUnpadded::encode_string(&[3u8; 32]));
        let codec = TokenCodec::from_base64_seed(&seed)?;
        assert_eq!(codec.kid(), TokenCodec::from_seed([3u8; 32]).kid());

        let short = SecretString::from(Base64UrlUnpadded::encode_string(&[3u8; 16]));
        assert!(matches!(
            TokenCodec::from_base64_seed(&short),
            Err(CodecError::InvalidKey)
        ));
        Ok(())
    }

    #[test]
    fn ephemeral_keys_are_distinct() -> Result<()> {
        let first = TokenCodec::ephemeral()?;
        let second = TokenCodec::ephemeral()?;
        assert_ne!(first.kid(), second.kid());
        Ok(())
    }
}
