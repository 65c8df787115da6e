//! Workflow metrics in the Prometheus text format.
//!
//! Every workflow request increments `tessera_workflow_total` labelled with the
//! workflow and its outcome, and records the engine time in
//! `tessera_workflow_duration_seconds`. Nothing is exported until
//! [`install`] has registered the recorder.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;

use crate::flow::{EngineError, Outcome, WorkflowKind};

pub const WORKFLOW_TOTAL: &str = "tessera_workflow_total";
pub const WORKFLOW_DURATION: &str = "tessera_workflow_duration_seconds";

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0];

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the process-wide Prometheus recorder. Later calls return the handle
/// of the first installation.
///
/// # Errors
/// Returns an error if another recorder is already installed.
pub fn install() -> Result<PrometheusHandle> {
    HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full(WORKFLOW_DURATION.to_string()),
                    DURATION_BUCKETS,
                )
                .context("Invalid histogram buckets")?
                .install_recorder()
                .context("Failed to install Prometheus recorder")?;
            describe();
            Ok(handle)
        })
        .cloned()
}

fn describe() {
    metrics::describe_counter!(WORKFLOW_TOTAL, "Workflow requests by workflow and outcome.");
    metrics::describe_histogram!(
        WORKFLOW_DURATION,
        metrics::Unit::Seconds,
        "Time spent executing a workflow request."
    );
}

/// Outcome label: `created`, `continue`, `errors`, `resume_failed` or `internal`.
#[must_use]
pub fn outcome_label(result: &Result<Outcome, EngineError>) -> &'static str {
    match result {
        Ok(Outcome::Created(_)) => "created",
        Ok(Outcome::Continue { .. }) => "continue",
        Ok(Outcome::Errors { .. }) => "errors",
        Ok(Outcome::ResumeFailed(_)) => "resume_failed",
        Err(_) => "internal",
    }
}

pub fn record_workflow(
    kind: WorkflowKind,
    result: &Result<Outcome, EngineError>,
    elapsed: Duration,
) {
    metrics::counter!(
        WORKFLOW_TOTAL,
        "workflow" => kind.as_str(),
        "outcome" => outcome_label(result)
    )
    .increment(1);
    metrics::histogram!(WORKFLOW_DURATION, "workflow" => kind.as_str())
        .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::ResumeError;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn labels_every_outcome() {
        let cases: [(Result<Outcome, EngineError>, &str); 4] = [
            (Ok(Outcome::Created(json!({}))), "created"),
            (
                Ok(Outcome::Continue {
                    step: "Email".to_string(),
                    token: "t".to_string(),
                }),
                "continue",
            ),
            (
                Ok(Outcome::Errors {
                    errors: BTreeMap::new(),
                    continuation: None,
                }),
                "errors",
            ),
            (Ok(Outcome::ResumeFailed(ResumeError::Spent)), "resume_failed"),
        ];
        for (result, label) in &cases {
            assert_eq!(outcome_label(result), *label);
        }
    }

    #[test]
    fn install_is_idempotent() -> Result<()> {
        let first = install()?;
        let second = install()?;
        record_workflow(
            WorkflowKind::Login,
            &Ok(Outcome::Created(json!({}))),
            Duration::from_millis(20),
        );
        for rendered in [first.render(), second.render()] {
            assert!(rendered.contains(WORKFLOW_TOTAL));
            assert!(rendered.contains(r#"workflow="login""#));
        }
        Ok(())
    }
}
