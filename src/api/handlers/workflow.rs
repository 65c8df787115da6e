use axum::{Json, extract::Extension, response::IntoResponse};
use std::sync::Arc;
use tracing::instrument;

use super::{AppState, ContinueBody, CreatedBody, ErrorsBody, FlowInput, run};
use crate::flow::WorkflowKind;

fn input(payload: Option<Json<FlowInput>>) -> FlowInput {
    payload.map(|Json(input)| input).unwrap_or_default()
}

#[utoipa::path(
    post,
    path= "/v1/register",
    request_body = FlowInput,
    responses (
        (status = 201, description = "User created", body = CreatedBody),
        (status = 200, description = "Values accepted, continue at the next step", body = ContinueBody),
        (status = 400, description = "A step refused a value", body = ErrorsBody),
        (status = 410, description = "Continuation token cannot be resumed", body = ErrorsBody),
    ),
    tag= "workflows"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::Registration, input(payload)).await
}

#[utoipa::path(
    post,
    path= "/v1/login",
    request_body = FlowInput,
    responses (
        (status = 201, description = "Credentials issued", body = CreatedBody),
        (status = 200, description = "Values accepted, continue at the next step", body = ContinueBody),
        (status = 401, description = "Unknown email or wrong password", body = ErrorsBody),
        (status = 410, description = "Continuation token cannot be resumed", body = ErrorsBody),
    ),
    tag= "workflows"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::Login, input(payload)).await
}

#[utoipa::path(
    post,
    path= "/v1/password-reset",
    request_body = FlowInput,
    responses (
        (status = 201, description = "Password replaced", body = CreatedBody),
        (status = 200, description = "Values accepted, continue at the next step", body = ContinueBody),
        (status = 400, description = "A step refused a value", body = ErrorsBody),
        (status = 410, description = "Continuation token cannot be resumed", body = ErrorsBody),
    ),
    tag= "workflows"
)]
#[instrument(skip_all)]
pub async fn password_reset(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::PasswordReset, input(payload)).await
}

#[utoipa::path(
    post,
    path= "/v1/token-refresh",
    request_body = FlowInput,
    responses (
        (status = 201, description = "Refresh token rotated, new pair issued", body = CreatedBody),
        (status = 401, description = "Refresh token invalid, expired or revoked", body = ErrorsBody),
    ),
    tag= "tokens"
)]
#[instrument(skip_all)]
pub async fn token_refresh(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::TokenRefresh, input(payload)).await
}

#[utoipa::path(
    post,
    path= "/v1/validate-token",
    request_body = FlowInput,
    responses (
        (status = 201, description = "Access token is valid", body = CreatedBody),
        (status = 401, description = "Access token invalid, expired or revoked", body = ErrorsBody),
    ),
    tag= "tokens"
)]
#[instrument(skip_all)]
pub async fn validate_token(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::TokenValidation, input(payload)).await
}

#[utoipa::path(
    post,
    path= "/v1/logout",
    request_body = FlowInput,
    responses (
        (status = 201, description = "Both tokens revoked", body = CreatedBody),
        (status = 401, description = "A token is invalid, expired or already revoked", body = ErrorsBody),
    ),
    tag= "tokens"
)]
#[instrument(skip_all)]
pub async fn logout(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<FlowInput>>,
) -> impl IntoResponse {
    run(&state, WorkflowKind::Logout, input(payload)).await
}
