use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{Identity, IdentityError, IdentityProvider, ProviderKind};

pub const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

// tokeninfo renders booleans as strings.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    email: Option<String>,
    email_verified: Option<String>,
    name: Option<String>,
}

/// Verifies Google id tokens through the `tokeninfo` endpoint.
///
/// Only tokens minted for `client_id` and carrying a verified email are accepted.
#[derive(Clone)]
pub struct GoogleProvider {
    client: Client,
    tokeninfo_url: Url,
    client_id: String,
}

impl GoogleProvider {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(tokeninfo_url: Url, client_id: impl Into<String>) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            tokeninfo_url,
            client_id: client_id.into(),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    #[instrument(skip_all, fields(provider = "google"))]
    async fn fetch_identity(&self, token: &str) -> Result<Identity, IdentityError> {
        let response = self
            .client
            .get(self.tokeninfo_url.clone())
            .query(&[("id_token", token)])
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "tokeninfo refused id token");
            return Err(IdentityError::Rejected(ProviderKind::Google));
        }

        let info: TokenInfo = response.json().await?;
        identity_from(info, &self.client_id)
    }
}

fn identity_from(info: TokenInfo, client_id: &str) -> Result<Identity, IdentityError> {
    if info.aud.as_deref() != Some(client_id) {
        debug!(aud = ?info.aud, "id token was issued to another client");
        return Err(IdentityError::Rejected(ProviderKind::Google));
    }
    if info.email_verified.as_deref() != Some("true") {
        debug!("id token email is not verified");
        return Err(IdentityError::Rejected(ProviderKind::Google));
    }
    let email = info
        .email
        .filter(|email| !email.trim().is_empty())
        .ok_or(IdentityError::MissingEmail(ProviderKind::Google))?;
    Ok(Identity {
        email,
        display_name: info.name.unwrap_or_default(),
    })
}
