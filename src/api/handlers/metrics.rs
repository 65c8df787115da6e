use super::AppState;
use axum::{
    extract::Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Prometheus scrape endpoint. Only routed when metrics are enabled.
pub async fn metrics(state: Extension<Arc<AppState>>) -> Response {
    match state.metrics() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
