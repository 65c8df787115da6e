use crate::{
    api::{self, handlers::AppState, handlers::AuthConfig},
    cache, directory, metrics,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub cache_url: String,
    pub metrics: bool,
    pub config: AuthConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a backend cannot be reached, a workflow chain is invalid,
/// or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let cache = cache::from_url(&args.cache_url).context("Failed to configure TTL cache")?;
    cache
        .ping()
        .await
        .with_context(|| format!("Failed to reach {} cache", cache.backend()))?;

    let directory = directory::connect(args.dsn.as_ref())
        .await
        .context("Failed to connect user directory")?;

    info!(
        cache = cache.backend(),
        directory = directory.backend(),
        "Backends ready"
    );

    let mut state = AppState::new(&args.config, cache, directory)?;
    if args.metrics {
        state = state.with_metrics(metrics::install()?);
        info!("Serving metrics on /metrics");
    }

    api::new(args.port, Arc::new(state)).await
}
