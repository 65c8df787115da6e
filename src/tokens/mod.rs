//! Signed tokens and the bearer credential lifecycle.

pub mod codec;
pub mod lifecycle;

pub use codec::{Claims, CodecError, TokenCodec};
pub use lifecycle::{
    CredentialBody, CredentialError, CredentialKind, CredentialTtls, LifecycleError,
    TokenLifecycle, TokenPair,
};
