//! # Tessera (resumable authentication workflows)
//!
//! `tessera` is an authentication backend built from two subsystems:
//!
//! ## Workflow engine ([`flow`])
//!
//! Register, login, password reset, third-party login, refresh and validate are each
//! an ordered chain of named steps. A chain is built and certified once at startup
//! and shared read-only afterwards. Every request carries an ordered map of field
//! values and, optionally, a continuation token; the engine validates the values in
//! order against the step the transaction is parked at, records them in an
//! accumulator, and either hands back a fresh continuation token, reports the
//! failing step, or finalizes the transaction.
//!
//! - **Stateless resume:** the continuation token is signed and only locates the
//!   transaction; accumulated values live in the TTL cache (idle TTL of 600 s).
//! - **Spent tokens:** a token pointing at a step other than the one the snapshot is
//!   parked at is refused, so a token cannot be replayed once the transaction moved.
//! - **Sensitive values:** password steps store Argon2 hashes, never plaintext.
//!
//! ## Credential lifecycle ([`tokens`])
//!
//! Access and refresh credentials are Ed25519-signed bearer tokens. Each issued
//! credential is recorded in the cache with a TTL equal to its remaining validity;
//! logout and rotation move it to a blacklist entry that never outlives it.
//!
//! User records ([`directory`]) and third-party identity claims ([`identity`]) are
//! collaborators behind traits. Request outcomes are counted in [`metrics`].

pub mod api;
pub mod cache;
pub mod cli;
pub mod directory;
pub mod flow;
pub mod identity;
pub mod metrics;
pub mod tokens;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
