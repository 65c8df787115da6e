//! Third-party token exchange.
//!
//! The provider token is verified first; the claims it yields are then fed to the
//! matching workflow as one request.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse, response::Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

use super::{AppState, CreatedBody, ErrorsBody, error_response, execute};
use crate::flow::{FlowRequest, WorkflowKind};
use crate::identity::Identity;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ThirdPartyExchange {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    token: String,
}

impl ThirdPartyExchange {
    fn check(&self) -> Result<(), Response> {
        for (key, value) in [("provider", &self.provider), ("token", &self.token)] {
            if value.trim().is_empty() {
                return Err(error_response(
                    StatusCode::BAD_REQUEST,
                    key,
                    format!("Invalid argument '{value}' for '{key}' data"),
                ));
            }
        }
        Ok(())
    }
}

async fn exchange(
    state: &AppState,
    kind: WorkflowKind,
    payload: Option<Json<ThirdPartyExchange>>,
) -> Response {
    let exchange = payload.map(|Json(exchange)| exchange).unwrap_or_default();
    if let Err(response) = exchange.check() {
        return response;
    }

    let identity: Identity = match state
        .identity()
        .fetch_identity(&exchange.provider, &exchange.token)
        .await
    {
        Ok(identity) => identity,
        Err(err) if err.is_rejection() => {
            return error_response(StatusCode::BAD_REQUEST, "provider", err.to_string());
        }
        Err(err) => {
            error!("Identity provider failed: {}", err);
            return error_response(
                StatusCode::BAD_GATEWAY,
                "provider",
                "Identity provider is unavailable.",
            );
        }
    };

    let request = match kind {
        WorkflowKind::ThirdPartyRegistration => FlowRequest::new([
            ("email", identity.email),
            ("username", identity.display_name),
        ]),
        _ => FlowRequest::new([("email", identity.email)]),
    };
    execute(state, kind, request).await
}

#[utoipa::path(
    post,
    path= "/v1/third-party-register",
    request_body = ThirdPartyExchange,
    responses (
        (status = 201, description = "User created from the provider identity", body = CreatedBody),
        (status = 400, description = "Provider refused the token or the email is taken", body = ErrorsBody),
        (status = 502, description = "Identity provider is unreachable", body = ErrorsBody),
    ),
    tag= "third-party"
)]
#[instrument(skip_all)]
pub async fn third_party_register(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ThirdPartyExchange>>,
) -> impl IntoResponse {
    exchange(&state, WorkflowKind::ThirdPartyRegistration, payload).await
}

#[utoipa::path(
    post,
    path= "/v1/third-party-login",
    request_body = ThirdPartyExchange,
    responses (
        (status = 201, description = "Credentials issued", body = CreatedBody),
        (status = 400, description = "Provider refused the token", body = ErrorsBody),
        (status = 401, description = "No user with the provider email", body = ErrorsBody),
        (status = 502, description = "Identity provider is unreachable", body = ErrorsBody),
    ),
    tag= "third-party"
)]
#[instrument(skip_all)]
pub async fn third_party_login(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ThirdPartyExchange>>,
) -> impl IntoResponse {
    exchange(&state, WorkflowKind::ThirdPartyLogin, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_are_refused_in_order() {
        let exchange = ThirdPartyExchange::default();
        let response = exchange.check().err();
        assert!(response.is_some());
        if let Some(response) = response {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let exchange = ThirdPartyExchange {
            provider: "google".to_string(),
            token: "  ".to_string(),
        };
        assert!(exchange.check().is_err());

        let exchange = ThirdPartyExchange {
            provider: "google".to_string(),
            token: "id-token".to_string(),
        };
        assert!(exchange.check().is_ok());
    }
}
