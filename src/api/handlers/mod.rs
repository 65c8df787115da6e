//! Route handlers and the response envelope shared by every workflow endpoint.
//!
//! Each workflow response is exactly one of `{"create": ..}`, `{"errors": {..}}`
//! or `{"message": .., "token": ..}`.

pub mod health;
pub mod metrics;
pub mod state;
pub mod third_party;
pub mod workflow;

pub use state::{AppState, AuthConfig};

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, time::Instant};
use tracing::{debug, error};
use utoipa::ToSchema;

use crate::flow::{EngineError, FlowRequest, Outcome, WorkflowKind, engine::INITIALIZATION};

/// Response header carrying a retry token after a field error.
pub const CONTINUATION_HEADER: &str = "x-continuation-token";

/// Ordered field values plus an optional continuation token.
#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct FlowInput {
    /// Token from the previous response of the same workflow.
    continuation: Option<String>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    fields: Map<String, Value>,
}

impl FlowInput {
    /// Field values must be strings; the first offending key is returned.
    fn into_request(self) -> Result<FlowRequest, String> {
        let mut fields = Vec::with_capacity(self.fields.len());
        for (key, value) in self.fields {
            match value {
                Value::String(value) => fields.push((key, value)),
                _ => return Err(key),
            }
        }
        Ok(FlowRequest {
            continuation: self.continuation,
            fields,
        })
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ContinueBody {
    message: String,
    token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorsBody {
    errors: BTreeMap<String, String>,
}

impl ErrorsBody {
    fn single(key: &str, message: impl Into<String>) -> Self {
        Self {
            errors: BTreeMap::from([(key.to_string(), message.into())]),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreatedBody {
    #[schema(value_type = Object)]
    create: Value,
}

pub(crate) fn error_response(status: StatusCode, key: &str, message: impl Into<String>) -> Response {
    (status, Json(ErrorsBody::single(key, message))).into_response()
}

pub(crate) fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "Internal server error.",
    )
}

/// Drive `kind` with `input` and map the outcome onto the envelope.
pub(crate) async fn run(state: &AppState, kind: WorkflowKind, input: FlowInput) -> Response {
    let request = match input.into_request() {
        Ok(request) => request,
        Err(key) => {
            return error_response(StatusCode::BAD_REQUEST, &key, "Value must be a string.");
        }
    };
    execute(state, kind, request).await
}

pub(crate) async fn execute(state: &AppState, kind: WorkflowKind, request: FlowRequest) -> Response {
    let Some(workflow) = state.workflow(kind) else {
        error!("Workflow {kind} is not registered");
        return internal_error();
    };

    let started = Instant::now();
    let result = state.engine().execute(&workflow, request).await;
    crate::metrics::record_workflow(kind, &result, started.elapsed());
    respond(kind, result)
}

fn respond(kind: WorkflowKind, result: Result<Outcome, EngineError>) -> Response {
    match result {
        Ok(Outcome::Continue { step, token }) => (
            StatusCode::OK,
            Json(ContinueBody {
                message: format!("Continue at step {step}"),
                token,
            }),
        )
            .into_response(),
        Ok(Outcome::Errors {
            errors,
            continuation,
        }) => {
            let status = if kind.validates_credentials() && !errors.contains_key(INITIALIZATION) {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::BAD_REQUEST
            };

            let mut headers = HeaderMap::new();
            if let Some(token) = continuation {
                match HeaderValue::from_str(&token) {
                    Ok(value) => {
                        headers.insert(CONTINUATION_HEADER, value);
                    }
                    Err(err) => error!("Failed to build continuation header: {}", err),
                }
            }

            (status, headers, Json(ErrorsBody { errors })).into_response()
        }
        Ok(Outcome::Created(create)) => {
            debug!("Workflow {kind} completed");
            (StatusCode::CREATED, Json(CreatedBody { create })).into_response()
        }
        Ok(Outcome::ResumeFailed(err)) => {
            debug!(reason = err.reason(), "Continuation refused");
            error_response(StatusCode::GONE, "continuation", err.to_string())
        }
        Err(err) => {
            error!("Workflow {kind} failed: {}", err);
            internal_error()
        }
    }
}
