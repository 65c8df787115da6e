//! Runs one request against one workflow.
//!
//! Values are consumed in the order the caller sent them. Each value is checked by
//! the step the transaction currently points at; the submitted key only names the
//! accumulator slot. The first refusal stops the request and is reported under the
//! active step's name, leaving the pointer where it was.

use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, instrument};

use super::continuation::{ContinuationError, ContinuationStore, ResumeError, Transaction};
use super::finalize::FinalizeError;
use super::step::TransformError;
use super::validators::StepFailure;
use super::workflows::Workflow;

/// Error key used when a fresh transaction carries no values at all.
pub const INITIALIZATION: &str = "initialization";

/// Collaborator or infrastructure failures. Never a validation result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("continuation store failed: {0}")]
    Continuation(ContinuationError),
    #[error("step collaborator failed: {0}")]
    Step(StepFailure),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("finalize failed: {0}")]
    Finalize(FinalizeError),
}

/// One request's worth of input.
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    pub continuation: Option<String>,
    pub fields: Vec<(String, String)>,
}

impl FlowRequest {
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            continuation: None,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn resume(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// Progress was made; resume at `step` with `token`.
    Continue { step: String, token: String },
    /// A step refused a value. `continuation` is set when the transaction was
    /// kept and can be retried at the failing step.
    Errors {
        errors: BTreeMap<String, String>,
        continuation: Option<String>,
    },
    /// The workflow completed; finalize result.
    Created(Value),
    /// The continuation token could not be resumed; restart the workflow.
    ResumeFailed(ResumeError),
}

pub struct WorkflowEngine {
    store: Arc<ContinuationStore>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(store: Arc<ContinuationStore>) -> Self {
        Self { store }
    }

    /// # Errors
    /// Returns [`EngineError`] when the cache, the directory, or another
    /// collaborator fails. Validation refusals and resume failures are
    /// [`Outcome`]s, not errors.
    #[instrument(skip_all, fields(workflow = %workflow.kind()))]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        request: FlowRequest,
    ) -> Result<Outcome, EngineError> {
        let chain = workflow.chain();
        let mut transaction = match request.continuation.as_deref() {
            Some(token) => match self.store.resume(workflow.kind(), chain, token).await {
                Ok(transaction) => transaction,
                Err(ContinuationError::Resume(err)) => {
                    debug!(reason = err.reason(), "Resume failed");
                    return Ok(Outcome::ResumeFailed(err));
                }
                Err(err) => return Err(EngineError::Continuation(err)),
            },
            None => self
                .store
                .begin(workflow.kind())
                .map_err(EngineError::Continuation)?,
        };

        if !transaction.is_resumed() && request.fields.is_empty() {
            return Ok(Outcome::Errors {
                errors: BTreeMap::from([(
                    INITIALIZATION.to_string(),
                    "Data cannot be empty.".to_string(),
                )]),
                continuation: None,
            });
        }

        let start = transaction.position();
        let mut errors = BTreeMap::new();

        for (key, value) in &request.fields {
            let Some(step) = chain.step(transaction.position()) else {
                break;
            };
            match step.validate_value(value, transaction.accumulator()).await {
                Ok(()) => {
                    let output = step.transform().apply(value)?;
                    transaction.record(key, output);
                    transaction.advance();
                }
                Err(StepFailure::Invalid(reason)) => {
                    debug!(step = step.name(), "Step refused value");
                    errors.insert(step.name().to_string(), reason);
                    break;
                }
                Err(err) => return Err(EngineError::Step(err)),
            }
        }

        if errors.is_empty() && transaction.position() == chain.terminal_position() {
            match self.complete(workflow, &transaction).await? {
                Ok(created) => return Ok(Outcome::Created(created)),
                Err((step, reason)) => {
                    errors.insert(step, reason);
                }
            }
        }

        // A fresh transaction that failed before making any progress is dropped.
        if !errors.is_empty() && !transaction.is_resumed() && transaction.position() == start {
            self.store
                .finalize(&transaction)
                .await
                .map_err(EngineError::Continuation)?;
            return Ok(Outcome::Errors {
                errors,
                continuation: None,
            });
        }

        let token = self
            .store
            .persist(chain, &transaction)
            .await
            .map_err(EngineError::Continuation)?;

        if errors.is_empty() {
            let step = chain
                .step(transaction.position())
                .map(|step| step.name().to_string())
                .unwrap_or_default();
            Ok(Outcome::Continue { step, token })
        } else {
            Ok(Outcome::Errors {
                errors,
                continuation: Some(token),
            })
        }
    }

    /// Terminal check and finalize. The inner `Err` is a refusal keyed by the
    /// terminal step; the accumulator is left as it is.
    async fn complete(
        &self,
        workflow: &Workflow,
        transaction: &Transaction,
    ) -> Result<Result<Value, (String, String)>, EngineError> {
        let chain = workflow.chain();
        let Some(terminal) = chain.step(chain.terminal_position()) else {
            return Ok(Err((String::new(), "Workflow has no steps.".to_string())));
        };
        let refused = |reason: String| -> Result<Result<Value, (String, String)>, EngineError> {
            Ok(Err((terminal.name().to_string(), reason)))
        };

        match terminal.validate_record(transaction.accumulator()).await {
            Ok(()) => {}
            Err(StepFailure::Invalid(reason)) => return refused(reason),
            Err(err) => return Err(EngineError::Step(err)),
        }

        match workflow.finalizer().finalize(transaction.accumulator()).await {
            Ok(created) => {
                self.store
                    .finalize(transaction)
                    .await
                    .map_err(EngineError::Continuation)?;
                debug!("Transaction finalized");
                Ok(Ok(created))
            }
            Err(err) => match err.rejection() {
                Some(reason) => refused(reason),
                None => Err(EngineError::Finalize(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::directory::{MemoryDirectory, UserDirectory};
    use crate::flow::continuation::ContinuationTtls;
    use crate::flow::workflows::{WorkflowKind, Workflows};
    use crate::tokens::{CredentialTtls, TokenCodec, TokenLifecycle};
    use anyhow::{Result, bail};
    use std::time::Duration;

    struct Harness {
        engine: WorkflowEngine,
        store: Arc<ContinuationStore>,
        workflows: Workflows,
        directory: Arc<dyn UserDirectory>,
        cache: Arc<MemoryCache>,
    }

    impl Harness {
        fn new() -> Result<Self> {
            let cache = Arc::new(MemoryCache::new());
            let codec = Arc::new(TokenCodec::from_seed([8u8; 32]));
            let directory: Arc<dyn UserDirectory> = Arc::new(MemoryDirectory::new());
            let lifecycle = Arc::new(TokenLifecycle::new(
                codec.clone(),
                cache.clone(),
                CredentialTtls::default(),
            ));
            let store = Arc::new(ContinuationStore::new(
                codec,
                cache.clone(),
                ContinuationTtls::default(),
            ));
            Ok(Self {
                engine: WorkflowEngine::new(store.clone()),
                store,
                workflows: Workflows::build(&directory, &lifecycle)?,
                directory,
                cache,
            })
        }

        async fn run(&self, kind: WorkflowKind, request: FlowRequest) -> Result<Outcome> {
            let Some(workflow) = self.workflows.get(kind) else {
                bail!("missing workflow {kind}");
            };
            Ok(self.engine.execute(&workflow, request).await?)
        }
    }

    fn continue_token(outcome: Outcome) -> Result<(String, String)> {
        match outcome {
            Outcome::Continue { step, token } => Ok((step, token)),
            other => bail!("expected continue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_username_reports_active_step() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("username", "ab"), ("email", "bob@example.com")]),
            )
            .await?;
        let Outcome::Errors {
            errors,
            continuation,
        } = outcome
        else {
            bail!("expected errors, got {outcome:?}");
        };
        assert_eq!(
            errors,
            BTreeMap::from([(
                "Username".to_string(),
                "Username must be 3-30 characters.".to_string()
            )])
        );
        assert!(continuation.is_none());
        assert!(harness.cache.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn empty_fresh_request_fails_initialization() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(WorkflowKind::Registration, FlowRequest::default())
            .await?;
        assert!(matches!(
            outcome,
            Outcome::Errors { ref errors, continuation: None } if errors.contains_key(INITIALIZATION)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn registration_one_field_per_request() -> Result<()> {
        let harness = Harness::new()?;
        let (step, token) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("username", "alice_w")]),
                )
                .await?,
        )?;
        assert_eq!(step, "Email");

        let (step, token) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("email", "bob@example.com")]).resume(token),
                )
                .await?,
        )?;
        assert_eq!(step, "Password");

        let (step, token) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("password", "Secret123")]).resume(token),
                )
                .await?,
        )?;
        assert_eq!(step, "PasswordRepeat");
        assert!(!harness.directory.exists_by_email("bob@example.com").await?);

        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("password_repeat", "Secret123")]).resume(token.clone()),
            )
            .await?;
        let Outcome::Created(user) = outcome else {
            bail!("expected created, got {outcome:?}");
        };
        assert_eq!(user["username"], "alice_w");
        assert!(harness.directory.exists_by_email("bob@example.com").await?);

        // The finalized transaction cannot be resumed again.
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("password_repeat", "Secret123")]).resume(token),
            )
            .await?;
        assert!(matches!(
            outcome,
            Outcome::ResumeFailed(ResumeError::TransactionGone)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn registration_all_fields_at_once() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([
                    ("username", "alice_w"),
                    ("email", "Bob@Example.com"),
                    ("password", "Secret123"),
                    ("password_repeat", "Secret123"),
                ]),
            )
            .await?;
        let Outcome::Created(user) = outcome else {
            bail!("expected created, got {outcome:?}");
        };
        assert_eq!(user["email"], "bob@example.com");
        assert!(harness.cache.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn field_error_after_progress_keeps_transaction() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([
                    ("username", "alice_w"),
                    ("email", "bob@example.com"),
                    ("password", "weak"),
                ]),
            )
            .await?;
        let Outcome::Errors {
            errors,
            continuation: Some(token),
        } = outcome
        else {
            bail!("expected errors with continuation, got {outcome:?}");
        };
        assert_eq!(
            errors.get("Password").map(String::as_str),
            Some("Password must be at least 8 characters.")
        );

        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("password", "Secret123"), ("password_repeat", "Secret123")])
                    .resume(token),
            )
            .await?;
        assert!(matches!(outcome, Outcome::Created(_)));
        Ok(())
    }

    #[tokio::test]
    async fn out_of_order_values_hit_the_wrong_validator() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("email", "bob@example.com")]),
            )
            .await?;
        let Outcome::Errors { errors, .. } = outcome else {
            bail!("expected errors, got {outcome:?}");
        };
        assert!(errors.contains_key("Username"));
        Ok(())
    }

    #[tokio::test]
    async fn similar_username_fails_terminal_step_without_rollback() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([
                    ("username", "bobby"),
                    ("email", "bobby@example.com"),
                    ("password", "Secret123"),
                    ("password_repeat", "Secret123"),
                ]),
            )
            .await?;
        let Outcome::Errors {
            errors,
            continuation: Some(token),
        } = outcome
        else {
            bail!("expected terminal errors, got {outcome:?}");
        };
        assert_eq!(
            errors.get("CompleteRegistration").map(String::as_str),
            Some("Username and email are too similar.")
        );

        // Parked at the terminal step: extra values are refused there.
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("username", "alice_w")]).resume(token),
            )
            .await?;
        let Outcome::Errors { errors, .. } = outcome else {
            bail!("expected errors, got {outcome:?}");
        };
        assert!(errors.contains_key("CompleteRegistration"));
        Ok(())
    }

    #[tokio::test]
    async fn garbage_token_is_a_resume_failure() -> Result<()> {
        let harness = Harness::new()?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("username", "alice_w")]).resume("not-a-token"),
            )
            .await?;
        assert!(matches!(outcome, Outcome::ResumeFailed(ResumeError::Token(_))));
        Ok(())
    }

    #[tokio::test]
    async fn spent_token_is_refused() -> Result<()> {
        let harness = Harness::new()?;
        let (_, first) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("username", "alice_w")]),
                )
                .await?,
        )?;
        continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("email", "bob@example.com")]).resume(first.clone()),
                )
                .await?,
        )?;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("email", "bob@example.com")]).resume(first),
            )
            .await?;
        assert!(matches!(outcome, Outcome::ResumeFailed(ResumeError::Spent)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_transaction_becomes_unresumable() -> Result<()> {
        let harness = Harness::new()?;
        let (_, token) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([("username", "alice_w")]),
                )
                .await?,
        )?;
        tokio::time::advance(Duration::from_secs(601)).await;
        let outcome = harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([("email", "bob@example.com")]).resume(token),
            )
            .await?;
        assert!(matches!(
            outcome,
            Outcome::ResumeFailed(ResumeError::TransactionGone)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_refresh_validate_logout() -> Result<()> {
        let harness = Harness::new()?;
        harness
            .run(
                WorkflowKind::Registration,
                FlowRequest::new([
                    ("username", "alice_w"),
                    ("email", "bob@example.com"),
                    ("password", "Secret123"),
                    ("password_repeat", "Secret123"),
                ]),
            )
            .await?;

        let outcome = harness
            .run(
                WorkflowKind::Login,
                FlowRequest::new([("email", "bob@example.com"), ("password", "Wrong1234")]),
            )
            .await?;
        assert!(matches!(
            outcome,
            Outcome::Errors { ref errors, .. } if errors.get("Password").map(String::as_str) == Some("Invalid email or password.")
        ));

        let outcome = harness
            .run(
                WorkflowKind::Login,
                FlowRequest::new([("email", "bob@example.com"), ("password", "Secret123")]),
            )
            .await?;
        let Outcome::Created(pair) = outcome else {
            bail!("expected tokens, got {outcome:?}");
        };
        let access = pair["access"].as_str().unwrap_or_default().to_string();
        let refresh = pair["refresh"].as_str().unwrap_or_default().to_string();

        let outcome = harness
            .run(
                WorkflowKind::TokenValidation,
                FlowRequest::new([("access", access.as_str())]),
            )
            .await?;
        assert!(matches!(outcome, Outcome::Created(ref v) if v["valid"] == true));

        let outcome = harness
            .run(
                WorkflowKind::TokenRefresh,
                FlowRequest::new([("refresh", refresh.as_str())]),
            )
            .await?;
        let Outcome::Created(rotated) = outcome else {
            bail!("expected rotated pair, got {outcome:?}");
        };

        let outcome = harness
            .run(
                WorkflowKind::TokenRefresh,
                FlowRequest::new([("refresh", refresh.as_str())]),
            )
            .await?;
        assert!(matches!(
            outcome,
            Outcome::Errors { ref errors, .. } if errors.get("refresh").map(String::as_str) == Some("Token is blacklisted.")
        ));

        let outcome = harness
            .run(
                WorkflowKind::Logout,
                FlowRequest::new([
                    ("access", rotated["access"].as_str().unwrap_or_default()),
                    ("refresh", rotated["refresh"].as_str().unwrap_or_default()),
                ]),
            )
            .await?;
        assert!(matches!(outcome, Outcome::Created(_)));
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_never_holds_plaintext_password() -> Result<()> {
        let harness = Harness::new()?;
        let (_, token) = continue_token(
            harness
                .run(
                    WorkflowKind::Registration,
                    FlowRequest::new([
                        ("username", "alice_w"),
                        ("email", "bob@example.com"),
                        ("password", "Secret123"),
                    ]),
                )
                .await?,
        )?;
        assert_eq!(harness.cache.len().await, 1);

        let Some(workflow) = harness.workflows.get(WorkflowKind::Registration) else {
            bail!("missing registration workflow");
        };
        let transaction = harness
            .store
            .resume(WorkflowKind::Registration, workflow.chain(), &token)
            .await?;
        let stored = transaction.accumulator().get("password").unwrap_or_default();
        assert_ne!(stored, "Secret123");
        assert!(stored.starts_with("$argon2id$"));
        Ok(())
    }
}
