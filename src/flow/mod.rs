//! Resumable multi-step workflows.
//!
//! A [`Workflow`](workflows::Workflow) pairs a certified [`WorkflowChain`] with a
//! [`Finalizer`]. The [`WorkflowEngine`] drives one request through it, using the
//! [`ContinuationStore`] to carry the transaction between requests.

pub mod accumulator;
pub mod chain;
pub mod continuation;
pub mod engine;
pub mod finalize;
pub mod step;
pub mod validators;
pub mod workflows;

pub use accumulator::Accumulator;
pub use chain::{ChainBuilder, ChainRule, InvalidChainError, WorkflowChain};
pub use continuation::{
    ContinuationError, ContinuationStore, ContinuationTtls, ResumeError, Transaction,
};
pub use engine::{EngineError, FlowRequest, Outcome, WorkflowEngine};
pub use finalize::{FinalizeError, Finalizer};
pub use step::{Step, StepKind, Transform};
pub use validators::{FieldValidator, RecordValidator, StepFailure};
pub use workflows::{Workflow, WorkflowKind, Workflows};
