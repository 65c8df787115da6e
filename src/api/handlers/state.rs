//! Handler state and the configuration it is built from.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::SecretString;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

use crate::{
    cache::TtlCache,
    directory::UserDirectory,
    flow::{ContinuationStore, ContinuationTtls, Workflow, WorkflowEngine, WorkflowKind, Workflows},
    identity::{GoogleProvider, IdentityProviders, ProviderKind},
    tokens::{CredentialTtls, TokenCodec, TokenLifecycle},
};

const DEFAULT_ACCESS_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_TRANSACTION_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_CONTINUATION_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone)]
pub struct AuthConfig {
    signing_key: Option<SecretString>,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
    transaction_ttl_seconds: u64,
    continuation_ttl_seconds: u64,
    google_tokeninfo_url: Url,
    google_client_id: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .field("transaction_ttl_seconds", &self.transaction_ttl_seconds)
            .field("continuation_ttl_seconds", &self.continuation_ttl_seconds)
            .field("google_tokeninfo_url", &self.google_tokeninfo_url.as_str())
            .field("google_client_id", &self.google_client_id)
            .finish()
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(google_tokeninfo_url: Url) -> Self {
        Self {
            signing_key: None,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            transaction_ttl_seconds: DEFAULT_TRANSACTION_TTL_SECONDS,
            continuation_ttl_seconds: DEFAULT_CONTINUATION_TTL_SECONDS,
            google_tokeninfo_url,
            google_client_id: None,
        }
    }

    #[must_use]
    pub fn with_signing_key(mut self, key: SecretString) -> Self {
        self.signing_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_transaction_ttl_seconds(mut self, seconds: u64) -> Self {
        self.transaction_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_continuation_ttl_seconds(mut self, seconds: u64) -> Self {
        self.continuation_ttl_seconds = seconds;
        self
    }

    /// OAuth client id Google id tokens must be issued to. Without it Google
    /// sign-in is disabled.
    #[must_use]
    pub fn with_google_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.google_client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> u64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> u64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn transaction_ttl_seconds(&self) -> u64 {
        self.transaction_ttl_seconds
    }

    #[must_use]
    pub fn continuation_ttl_seconds(&self) -> u64 {
        self.continuation_ttl_seconds
    }

    #[must_use]
    pub fn google_tokeninfo_url(&self) -> &Url {
        &self.google_tokeninfo_url
    }

    #[must_use]
    pub fn google_client_id(&self) -> Option<&str> {
        self.google_client_id.as_deref()
    }

    fn identity_providers(&self) -> Result<IdentityProviders> {
        let providers = IdentityProviders::new();
        let Some(client_id) = self.google_client_id() else {
            warn!("No Google client id configured, Google sign-in is disabled");
            return Ok(providers);
        };
        let google = GoogleProvider::new(self.google_tokeninfo_url.clone(), client_id)
            .context("Failed to build Google identity provider")?;
        Ok(providers.with(ProviderKind::Google, Arc::new(google)))
    }

    fn credential_ttls(&self) -> CredentialTtls {
        CredentialTtls {
            access: Duration::from_secs(self.access_ttl_seconds),
            refresh: Duration::from_secs(self.refresh_ttl_seconds),
        }
    }

    fn continuation_ttls(&self) -> ContinuationTtls {
        ContinuationTtls {
            transaction: Duration::from_secs(self.transaction_ttl_seconds),
            token: Duration::from_secs(self.continuation_ttl_seconds),
        }
    }

    fn codec(&self) -> Result<TokenCodec> {
        match &self.signing_key {
            Some(key) => TokenCodec::from_base64_seed(key).context("Invalid signing key"),
            None => {
                warn!("No signing key configured, using an ephemeral key; tokens will not survive a restart");
                TokenCodec::ephemeral().context("Failed to generate ephemeral signing key")
            }
        }
    }
}

/// Everything the handlers share. Built once at startup.
pub struct AppState {
    engine: WorkflowEngine,
    workflows: Workflows,
    identity: IdentityProviders,
    cache: Arc<dyn TtlCache>,
    directory: Arc<dyn UserDirectory>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the codec, the credential lifecycle, and every workflow chain.
    ///
    /// # Errors
    /// Returns an error if the signing key is unusable or a workflow chain is
    /// structurally invalid.
    pub fn new(
        config: &AuthConfig,
        cache: Arc<dyn TtlCache>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let codec = Arc::new(config.codec()?);
        info!(kid = codec.kid(), "Token signing key loaded");

        let lifecycle = Arc::new(TokenLifecycle::new(
            codec.clone(),
            cache.clone(),
            config.credential_ttls(),
        ));
        let store = Arc::new(ContinuationStore::new(
            codec,
            cache.clone(),
            config.continuation_ttls(),
        ));
        let workflows =
            Workflows::build(&directory, &lifecycle).context("Invalid workflow chain")?;

        let identity = config.identity_providers()?;

        Ok(Self {
            engine: WorkflowEngine::new(store),
            workflows,
            identity,
            cache,
            directory,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_identity_providers(mut self, identity: IdentityProviders) -> Self {
        self.identity = identity;
        self
    }

    /// Serve `GET /metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }

    pub(crate) fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub(crate) fn workflow(&self, kind: WorkflowKind) -> Option<Arc<Workflow>> {
        self.workflows.get(kind)
    }

    pub(crate) fn identity(&self) -> &IdentityProviders {
        &self.identity
    }

    pub(crate) fn cache(&self) -> &dyn TtlCache {
        self.cache.as_ref()
    }

    pub(crate) fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }
}
