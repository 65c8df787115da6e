//! Continuation store: lets one transaction span several stateless requests.
//!
//! The continuation token is a signed `{tid, step, kind}` claim with a short absolute
//! expiry. It only locates the transaction. The accumulated values live in the TTL
//! cache under `flow:<kind>:<tid>` together with the step the transaction is parked
//! at, and expire after an idle TTL that every persist renews.
//!
//! A token is refused when its signature or expiry is bad, when the snapshot is
//! gone, when it names a step the chain does not have, when it names a step other
//! than the one the snapshot is parked at (the token was already spent), or when it
//! belongs to another workflow kind.
//!
//! # Concurrent resume
//!
//! Two requests carrying the same token both read the same snapshot, both advance
//! it, and both write it back; the cache keeps whichever write lands last and both
//! callers receive a token. Nothing serializes them: there is no lock and no version
//! stamp on the snapshot. If both reach the terminal step, the finalizer may run
//! twice. The directory's uniqueness constraints and the credential blacklist bound
//! the damage for the shipped workflows.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;

use super::accumulator::Accumulator;
use super::chain::WorkflowChain;
use super::workflows::WorkflowKind;
use crate::cache::{CacheError, TtlCache};
use crate::tokens::{CodecError, TokenCodec};

/// Why a continuation token cannot be resumed. The client should restart the
/// workflow rather than retry the same field.
#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("continuation token is invalid: {0}")]
    Token(CodecError),
    #[error("continuation token has expired")]
    TokenExpired,
    #[error("transaction has expired or does not exist")]
    TransactionGone,
    #[error("transaction snapshot is unreadable")]
    Corrupt,
    #[error("unknown step: {0}")]
    UnknownStep(String),
    #[error("continuation token was already used")]
    Spent,
    #[error("continuation token belongs to the {0} workflow")]
    WrongWorkflow(WorkflowKind),
}

impl ResumeError {
    /// Short machine-readable reason.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Token(_) => "invalid",
            Self::TokenExpired => "expired",
            Self::TransactionGone => "transaction_gone",
            Self::Corrupt => "corrupt",
            Self::UnknownStep(_) => "unknown_step",
            Self::Spent => "spent",
            Self::WrongWorkflow(_) => "wrong_workflow",
        }
    }
}

#[derive(Debug, Error)]
pub enum ContinuationError {
    #[error(transparent)]
    Resume(#[from] ResumeError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to sign continuation token: {0}")]
    Codec(#[from] CodecError),
    #[error("failed to encode transaction snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("failed to generate transaction id")]
    Entropy,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContinuationClaims {
    tid: String,
    step: String,
    kind: WorkflowKind,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    step: String,
    accumulator: Accumulator,
}

/// One in-progress instance of a workflow.
#[derive(Debug, Clone)]
pub struct Transaction {
    id: String,
    kind: WorkflowKind,
    position: usize,
    accumulator: Accumulator,
    resumed: bool,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    /// Index of the first step not yet satisfied.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// `true` when this transaction came from a continuation token.
    #[must_use]
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub(crate) fn record(&mut self, key: &str, value: String) {
        self.accumulator.record(key, value);
    }

    pub(crate) fn advance(&mut self) {
        self.position += 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContinuationTtls {
    /// Idle TTL of the snapshot, renewed on every persist.
    pub transaction: Duration,
    /// Absolute lifetime of each continuation token.
    pub token: Duration,
}

impl Default for ContinuationTtls {
    fn default() -> Self {
        Self {
            transaction: Duration::from_secs(600),
            token: Duration::from_secs(600),
        }
    }
}

pub struct ContinuationStore {
    codec: Arc<TokenCodec>,
    cache: Arc<dyn TtlCache>,
    ttls: ContinuationTtls,
}

impl ContinuationStore {
    #[must_use]
    pub fn new(codec: Arc<TokenCodec>, cache: Arc<dyn TtlCache>, ttls: ContinuationTtls) -> Self {
        Self { codec, cache, ttls }
    }

    /// Allocate a fresh transaction at the head of the chain. Nothing is written
    /// until the first [`persist`](Self::persist).
    ///
    /// # Errors
    /// Returns an error if the OS random source fails.
    pub fn begin(&self, kind: WorkflowKind) -> Result<Transaction, ContinuationError> {
        Ok(Transaction {
            id: transaction_id()?,
            kind,
            position: 0,
            accumulator: Accumulator::new(),
            resumed: false,
        })
    }

    /// Rebuild the transaction a continuation token points at.
    ///
    /// # Errors
    /// [`ContinuationError::Resume`] when the token cannot be resumed; other
    /// variants when the cache fails.
    pub async fn resume(
        &self,
        kind: WorkflowKind,
        chain: &WorkflowChain,
        token: &str,
    ) -> Result<Transaction, ContinuationError> {
        let claims = self
            .codec
            .verify::<ContinuationClaims>(token)
            .map_err(|err| match err {
                CodecError::Expired => ResumeError::TokenExpired,
                err => ResumeError::Token(err),
            })?
            .body;
        if claims.kind != kind {
            return Err(ResumeError::WrongWorkflow(claims.kind).into());
        }

        let Some(bytes) = self.cache.get(&snapshot_key(kind, &claims.tid)).await? else {
            return Err(ResumeError::TransactionGone.into());
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|_| ResumeError::Corrupt)?;

        let position = chain
            .position(&claims.step)
            .ok_or_else(|| ResumeError::UnknownStep(claims.step.clone()))?;
        if snapshot.step != claims.step {
            return Err(ResumeError::Spent.into());
        }

        debug!(kind = %kind, step = %claims.step, "Resumed transaction");
        Ok(Transaction {
            id: claims.tid,
            kind,
            position,
            accumulator: snapshot.accumulator,
            resumed: true,
        })
    }

    /// Write the snapshot with a renewed idle TTL and sign a token for the step the
    /// transaction is parked at.
    ///
    /// # Errors
    /// Returns an error if the cache write or signing fails.
    pub async fn persist(
        &self,
        chain: &WorkflowChain,
        transaction: &Transaction,
    ) -> Result<String, ContinuationError> {
        let step = chain
            .step(transaction.position)
            .map(|step| step.name().to_string())
            .ok_or_else(|| ResumeError::UnknownStep(transaction.position.to_string()))?;
        let snapshot = Snapshot {
            step: step.clone(),
            accumulator: transaction.accumulator.clone(),
        };
        self.cache
            .set(
                &snapshot_key(transaction.kind, &transaction.id),
                &serde_json::to_vec(&snapshot)?,
                self.ttls.transaction,
            )
            .await?;

        let claims = ContinuationClaims {
            tid: transaction.id.clone(),
            step,
            kind: transaction.kind,
        };
        Ok(self.codec.sign(&claims, self.ttls.token)?)
    }

    /// Drop the snapshot; any outstanding token for it becomes unresumable.
    ///
    /// # Errors
    /// Returns an error if the cache fails.
    pub async fn finalize(&self, transaction: &Transaction) -> Result<(), ContinuationError> {
        self.cache
            .delete(&snapshot_key(transaction.kind, &transaction.id))
            .await?;
        Ok(())
    }
}

fn snapshot_key(kind: WorkflowKind, id: &str) -> String {
    format!("flow:{kind}:{id}")
}

fn transaction_id() -> Result<String, ContinuationError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| ContinuationError::Entropy)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}
