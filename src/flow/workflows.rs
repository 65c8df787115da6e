//! The shipped workflow kinds and the table they are dispatched from.
//!
//! Every chain is built and certified once by [`Workflows::build`]; an invalid
//! chain aborts startup.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

use super::chain::{ChainBuilder, InvalidChainError, WorkflowChain};
use super::finalize::{
    CreateThirdPartyUser, CreateUser, DescribeCredential, Finalizer, IssueTokens, ResetPassword,
    RevokeTokens, RotateTokens,
};
use super::step::{Step, Transform};
use super::validators::{
    AcceptAll, CredentialCheck, CredentialValidator, DisplayNameValidator, EmailValidator,
    NonEmptyRecord, PasswordRepeat, PasswordStrength, RegistrationRecord, UsernameValidator,
};
use crate::directory::UserDirectory;
use crate::tokens::{CredentialKind, TokenLifecycle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Registration,
    Login,
    PasswordReset,
    ThirdPartyRegistration,
    ThirdPartyLogin,
    TokenRefresh,
    TokenValidation,
    Logout,
}

impl WorkflowKind {
    pub const ALL: [Self; 8] = [
        Self::Registration,
        Self::Login,
        Self::PasswordReset,
        Self::ThirdPartyRegistration,
        Self::ThirdPartyLogin,
        Self::TokenRefresh,
        Self::TokenValidation,
        Self::Logout,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Login => "login",
            Self::PasswordReset => "password_reset",
            Self::ThirdPartyRegistration => "third_party_registration",
            Self::ThirdPartyLogin => "third_party_login",
            Self::TokenRefresh => "token_refresh",
            Self::TokenValidation => "token_validation",
            Self::Logout => "logout",
        }
    }

    /// Workflows whose field failures mean "bad credentials" rather than "bad input".
    #[must_use]
    pub fn validates_credentials(self) -> bool {
        matches!(
            self,
            Self::Login
                | Self::ThirdPartyLogin
                | Self::TokenRefresh
                | Self::TokenValidation
                | Self::Logout
        )
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A certified chain paired with the action run when it completes.
pub struct Workflow {
    kind: WorkflowKind,
    chain: WorkflowChain,
    finalizer: Arc<dyn Finalizer>,
}

impl Workflow {
    #[must_use]
    pub fn new(kind: WorkflowKind, chain: WorkflowChain, finalizer: Arc<dyn Finalizer>) -> Self {
        Self {
            kind,
            chain,
            finalizer,
        }
    }

    #[must_use]
    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    #[must_use]
    pub fn chain(&self) -> &WorkflowChain {
        &self.chain
    }

    #[must_use]
    pub fn finalizer(&self) -> &dyn Finalizer {
        self.finalizer.as_ref()
    }
}

pub struct Workflows {
    table: HashMap<WorkflowKind, Arc<Workflow>>,
}

impl Workflows {
    /// Build every workflow kind against the given collaborators.
    ///
    /// # Errors
    /// Returns the first chain that violates its structural rules.
    pub fn build(
        directory: &Arc<dyn UserDirectory>,
        lifecycle: &Arc<TokenLifecycle>,
    ) -> Result<Self, InvalidChainError> {
        let mut table = HashMap::new();
        for kind in WorkflowKind::ALL {
            let workflow = factory(kind, directory, lifecycle)?;
            table.insert(kind, Arc::new(workflow));
        }
        Ok(Self { table })
    }

    #[must_use]
    pub fn get(&self, kind: WorkflowKind) -> Option<Arc<Workflow>> {
        self.table.get(&kind).cloned()
    }
}

fn factory(
    kind: WorkflowKind,
    directory: &Arc<dyn UserDirectory>,
    lifecycle: &Arc<TokenLifecycle>,
) -> Result<Workflow, InvalidChainError> {
    let email = |validator: EmailValidator| {
        Step::field("Email", validator).with_transform(Transform::NormalizeEmail)
    };
    let chain = ChainBuilder::new(kind.as_str());

    let (chain, finalizer): (ChainBuilder, Arc<dyn Finalizer>) = match kind {
        WorkflowKind::Registration => (
            chain
                .then(Step::field(
                    "Username",
                    UsernameValidator::new(directory.clone()),
                ))
                .then(email(EmailValidator::create(directory.clone())))
                .then(Step::sensitive("Password", PasswordStrength))
                .then(Step::sensitive(
                    "PasswordRepeat",
                    PasswordRepeat::of("password"),
                ))
                .then(Step::terminal("CompleteRegistration", RegistrationRecord)),
            Arc::new(CreateUser::new(directory.clone())),
        ),
        WorkflowKind::Login => (
            chain
                .then(email(EmailValidator::exists(directory.clone())))
                .then(Step::sensitive(
                    "Password",
                    CredentialCheck::new(directory.clone(), "email"),
                ))
                .then(Step::terminal("CompleteLogin", NonEmptyRecord)),
            Arc::new(IssueTokens::new(directory.clone(), lifecycle.clone())),
        ),
        WorkflowKind::PasswordReset => (
            chain
                .then(email(EmailValidator::exists(directory.clone())))
                .then(Step::sensitive("Password", PasswordStrength))
                .then(Step::sensitive(
                    "PasswordRepeat",
                    PasswordRepeat::of("password"),
                ))
                .then(Step::terminal("CompletePasswordReset", NonEmptyRecord)),
            Arc::new(ResetPassword::new(directory.clone())),
        ),
        WorkflowKind::ThirdPartyRegistration => (
            chain
                .then(email(EmailValidator::create(directory.clone())))
                .then(Step::field("DisplayName", DisplayNameValidator))
                .then(Step::terminal(
                    "CompleteThirdPartyRegistration",
                    NonEmptyRecord,
                )),
            Arc::new(CreateThirdPartyUser::new(directory.clone())),
        ),
        WorkflowKind::ThirdPartyLogin => (
            chain
                .then(email(EmailValidator::exists(directory.clone())))
                .then(Step::terminal("CompleteThirdPartyLogin", NonEmptyRecord)),
            Arc::new(IssueTokens::new(directory.clone(), lifecycle.clone())),
        ),
        WorkflowKind::TokenRefresh => (
            chain
                .then(Step::field(
                    "refresh",
                    CredentialValidator::new(lifecycle.clone(), CredentialKind::Refresh),
                ))
                .then(Step::terminal("CompleteRefresh", AcceptAll)),
            Arc::new(RotateTokens::new(lifecycle.clone())),
        ),
        WorkflowKind::TokenValidation => (
            chain
                .then(Step::field(
                    "access",
                    CredentialValidator::new(lifecycle.clone(), CredentialKind::Access),
                ))
                .then(Step::terminal("CompleteValidation", AcceptAll)),
            Arc::new(DescribeCredential::new(lifecycle.clone())),
        ),
        WorkflowKind::Logout => (
            chain
                .then(Step::field(
                    "access",
                    CredentialValidator::new(lifecycle.clone(), CredentialKind::Access),
                ))
                .then(Step::field(
                    "refresh",
                    CredentialValidator::new(lifecycle.clone(), CredentialKind::Refresh),
                ))
                .then(Step::terminal("CompleteLogout", AcceptAll)),
            Arc::new(RevokeTokens::new(lifecycle.clone())),
        ),
    };

    Ok(Workflow::new(kind, chain.build()?, finalizer))
}
