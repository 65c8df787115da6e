//! Map validated CLI arguments to an action.

use crate::api::handlers::AuthConfig;
use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_CACHE_URL, ARG_DSN, ARG_METRICS, ARG_PORT, auth};
use anyhow::Result;
use secrecy::SecretString;

use crate::cache::MEMORY_URL;

/// # Errors
/// Returns an error if an argument value is inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .map(|dsn| SecretString::from(dsn.clone()));
    let cache_url = matches
        .get_one::<String>(ARG_CACHE_URL)
        .cloned()
        .unwrap_or_else(|| MEMORY_URL.to_string());
    let metrics = matches.get_flag(ARG_METRICS);

    let auth_opts = auth::Options::parse(matches)?;
    let mut config = AuthConfig::new(auth_opts.google_tokeninfo_url)
        .with_access_ttl_seconds(auth_opts.access_ttl_seconds)
        .with_refresh_ttl_seconds(auth_opts.refresh_ttl_seconds)
        .with_transaction_ttl_seconds(auth_opts.transaction_ttl_seconds)
        .with_continuation_ttl_seconds(auth_opts.continuation_ttl_seconds);
    if let Some(key) = auth_opts.signing_key {
        config = config.with_signing_key(key);
    }
    if let Some(client_id) = auth_opts.google_client_id {
        config = config.with_google_client_id(client_id);
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        cache_url,
        metrics,
        config,
    }))
}
