use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

use crate::identity::GOOGLE_TOKENINFO_URL;

pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_ACCESS_TTL: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-ttl-seconds";
pub const ARG_TRANSACTION_TTL: &str = "transaction-ttl-seconds";
pub const ARG_CONTINUATION_TTL: &str = "continuation-ttl-seconds";
pub const ARG_GOOGLE_TOKENINFO_URL: &str = "google-tokeninfo-url";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_workflow_args(command);
    with_identity_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Ed25519 signing seed, 32 bytes base64url (unpadded)")
                .long_help(
                    "Ed25519 signing seed, 32 bytes base64url (unpadded). When absent an ephemeral key is generated and every token is lost on restart.",
                )
                .env("TESSERA_SIGNING_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .env("TESSERA_ACCESS_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .env("TESSERA_REFRESH_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_workflow_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRANSACTION_TTL)
                .long(ARG_TRANSACTION_TTL)
                .help("Idle lifetime of an in-progress workflow in seconds")
                .env("TESSERA_TRANSACTION_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CONTINUATION_TTL)
                .long(ARG_CONTINUATION_TTL)
                .help("Lifetime of each continuation token in seconds")
                .env("TESSERA_CONTINUATION_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_identity_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GOOGLE_TOKENINFO_URL)
                .long(ARG_GOOGLE_TOKENINFO_URL)
                .help("Google id token introspection endpoint")
                .env("TESSERA_GOOGLE_TOKENINFO_URL")
                .default_value(GOOGLE_TOKENINFO_URL),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("OAuth client id accepted in the aud claim of Google id tokens")
                .long_help(
                    "OAuth client id accepted in the aud claim of Google id tokens. When absent Google sign-in is disabled.",
                )
                .env("TESSERA_GOOGLE_CLIENT_ID"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub signing_key: Option<SecretString>,
    pub access_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub transaction_ttl_seconds: u64,
    pub continuation_ttl_seconds: u64,
    pub google_tokeninfo_url: Url,
    pub google_client_id: Option<String>,
}

impl Options {
    /// # Errors
    /// Returns an error if the Google tokeninfo URL is not a valid URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let ttl = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        let google_tokeninfo_url = matches
            .get_one::<String>(ARG_GOOGLE_TOKENINFO_URL)
            .map_or(GOOGLE_TOKENINFO_URL, String::as_str);
        let google_tokeninfo_url = Url::parse(google_tokeninfo_url)
            .with_context(|| format!("invalid --{ARG_GOOGLE_TOKENINFO_URL}: {google_tokeninfo_url}"))?;

        Ok(Self {
            signing_key: matches
                .get_one::<String>(ARG_SIGNING_KEY)
                .map(|key| SecretString::from(key.clone())),
            access_ttl_seconds: ttl(ARG_ACCESS_TTL, 300),
            refresh_ttl_seconds: ttl(ARG_REFRESH_TTL, 86_400),
            transaction_ttl_seconds: ttl(ARG_TRANSACTION_TTL, 600),
            continuation_ttl_seconds: ttl(ARG_CONTINUATION_TTL, 600),
            google_tokeninfo_url,
            google_client_id: matches
                .get_one::<String>(ARG_GOOGLE_CLIENT_ID)
                .filter(|id| !id.trim().is_empty())
                .cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults() -> Result<()> {
        let matches = with_args(Command::new("tessera")).get_matches_from(vec!["tessera"]);
        let options = Options::parse(&matches)?;
        assert!(options.signing_key.is_none());
        assert_eq!(options.access_ttl_seconds, 300);
        assert_eq!(options.refresh_ttl_seconds, 86_400);
        assert_eq!(options.transaction_ttl_seconds, 600);
        assert_eq!(options.continuation_ttl_seconds, 600);
        assert_eq!(options.google_tokeninfo_url.as_str(), GOOGLE_TOKENINFO_URL);
        assert!(options.google_client_id.is_none());
        Ok(())
    }

    #[test]
    fn overrides() -> Result<()> {
        let matches = with_args(Command::new("tessera")).get_matches_from(vec![
            "tessera",
            "--signing-key",
            "seed",
            "--access-ttl-seconds",
            "60",
            "--google-tokeninfo-url",
            "http://127.0.0.1:9000/tokeninfo",
            "--google-client-id",
            "tessera.apps.googleusercontent.com",
        ]);
        let options = Options::parse(&matches)?;
        assert_eq!(
            options.google_client_id.as_deref(),
            Some("tessera.apps.googleusercontent.com")
        );
        assert_eq!(
            options.signing_key.as_ref().map(|key| key.expose_secret()),
            Some("seed")
        );
        assert_eq!(options.access_ttl_seconds, 60);
        assert_eq!(
            options.google_tokeninfo_url.as_str(),
            "http://127.0.0.1:9000/tokeninfo"
        );
        Ok(())
    }

    #[test]
    fn zero_ttl_is_refused() {
        let result = with_args(Command::new("tessera")).try_get_matches_from(vec![
            "tessera",
            "--refresh-ttl-seconds",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_tokeninfo_url() {
        let matches = with_args(Command::new("tessera")).get_matches_from(vec![
            "tessera",
            "--google-tokeninfo-url",
            "not a url",
        ]);
        assert!(Options::parse(&matches).is_err());
    }
}
