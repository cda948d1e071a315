//! Error types for the account execution core.

use strum::Display;
use thiserror::Error;

use crate::{credential::Credential, types::AccountId};

/// Result type for account operations.
pub type Result<T> = std::result::Result<T, AccountKitError>;

/// Coarse classification of failures.
///
/// Every failure is terminal for the request that produced it. Callers
/// decide whether to resubmit based on the kind and on
/// [`AccountKitError::is_retryable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// An account or credential is missing.
    NotFound,
    /// The request collides with existing or concurrent state.
    Conflict,
    /// The request is not authorized to act on the account.
    Unauthorized,
    /// The request is malformed.
    Invalid,
    /// An external collaborator failed.
    Dependency,
}

/// Errors raised by the account execution core.
#[derive(Debug, Error)]
pub enum AccountKitError {
    /// The account id is empty, too long or contains whitespace.
    #[error("invalid account id: {reason}")]
    InvalidAccountId {
        /// Why the id was rejected.
        reason: String,
    },

    /// An account with this id already exists.
    #[error("account {account_id} already exists")]
    DuplicateAccount {
        /// The colliding account id.
        account_id: AccountId,
    },

    /// No account matches the lookup.
    #[error("account not found: {lookup}")]
    AccountNotFound {
        /// The id or credential that was looked up.
        lookup: String,
    },

    /// A credential failed its structural validation.
    #[error("invalid credential: {reason}")]
    InvalidCredential {
        /// Why the credential was rejected.
        reason: String,
    },

    /// The credential already maps to an account.
    #[error("credential {credential} is already bound to account {account_id}")]
    CredentialAlreadyBound {
        /// The credential being bound.
        credential: Credential,
        /// The account that currently owns it.
        account_id: AccountId,
    },

    /// The credential is not part of the account.
    #[error("credential {credential} is not bound to account {account_id}")]
    CredentialNotFound {
        /// The credential being removed.
        credential: Credential,
        /// The account it was expected on.
        account_id: AccountId,
    },

    /// Removing the credential would leave the account without credentials.
    #[error("cannot remove the last credential of account {account_id}")]
    LastCredentialRemoval {
        /// The account that would become empty.
        account_id: AccountId,
    },

    /// A verification call is already outstanding for the account.
    #[error("account {account_id} already has a pending execution")]
    PendingExecutionExists {
        /// The guarded account.
        account_id: AccountId,
    },

    /// No matching dispatched execution exists for the callback.
    #[error("no pending execution for account {account_id}")]
    NoPendingExecution {
        /// The account named by the callback.
        account_id: AccountId,
    },

    /// The transaction nonce does not match the account nonce.
    #[error("nonce mismatch: account is at {expected}, transaction has {found}")]
    NonceMismatch {
        /// Current account nonce.
        expected: u64,
        /// Nonce carried by the transaction.
        found: u64,
    },

    /// The target credential does not belong to the resolved account.
    #[error("target credential {credential} is not bound to account {account_id}")]
    UnauthorizedTarget {
        /// The requested target.
        credential: Credential,
        /// The resolved account.
        account_id: AccountId,
    },

    /// The signed message does not embed the transaction digest.
    #[error("message does not embed transaction digest {expected_digest}")]
    MessageMismatch {
        /// Digest of the submitted transaction.
        expected_digest: String,
    },

    /// The account nonce cannot be incremented further.
    #[error("nonce of account {account_id} is exhausted")]
    NonceExhausted {
        /// The account at the maximum nonce.
        account_id: AccountId,
    },

    /// The account changed while verification was outstanding.
    #[error("stale execution for account {account_id}: {reason}")]
    StaleExecution {
        /// The guarded account.
        account_id: AccountId,
        /// What changed.
        reason: String,
    },

    /// The validator rejected the signature.
    #[error("authorization failed for account {account_id}")]
    AuthorizationFailed {
        /// The account the request targeted.
        account_id: AccountId,
    },

    /// The transaction carries more actions than configured.
    #[error("transaction has {count} actions, limit is {limit}")]
    TooManyActions {
        /// Number of actions submitted.
        count: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// An `InvokeSigner` action names a path other than the target's.
    #[error("derivation path mismatch: expected {expected}, found {found}")]
    DerivationPathMismatch {
        /// Path derived from the target credential.
        expected: String,
        /// Path carried by the action.
        found: String,
    },

    /// The remote signer failed. Earlier actions remain applied.
    #[error("signer invocation failed at action {action_index}: {reason}")]
    SignerInvocationFailed {
        /// Position of the failing action in the transaction.
        action_index: usize,
        /// Failure reported by the signer.
        reason: String,
    },

    /// The credential validator failed or is not registered.
    #[error("validator invocation failed: {0}")]
    ValidatorInvocationFailed(String),

    /// A store snapshot violates the store invariants.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Unexpected error serializing information.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AccountKitError {
    /// Returns the taxonomy bucket of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound { .. }
            | Self::CredentialNotFound { .. }
            | Self::NoPendingExecution { .. } => ErrorKind::NotFound,
            Self::DuplicateAccount { .. }
            | Self::CredentialAlreadyBound { .. }
            | Self::LastCredentialRemoval { .. }
            | Self::PendingExecutionExists { .. }
            | Self::NonceExhausted { .. }
            | Self::StaleExecution { .. } => ErrorKind::Conflict,
            Self::UnauthorizedTarget { .. }
            | Self::MessageMismatch { .. }
            | Self::AuthorizationFailed { .. } => ErrorKind::Unauthorized,
            Self::InvalidAccountId { .. }
            | Self::InvalidCredential { .. }
            | Self::NonceMismatch { .. }
            | Self::TooManyActions { .. }
            | Self::DerivationPathMismatch { .. }
            | Self::InvalidSnapshot(_)
            | Self::Serialization(_) => ErrorKind::Invalid,
            Self::SignerInvocationFailed { .. } | Self::ValidatorInvocationFailed(_) => {
                ErrorKind::Dependency
            }
        }
    }

    /// Whether a fresh request for the same intent may later succeed.
    ///
    /// A fresh request is built against the account's current nonce. After
    /// [`Self::StaleExecution`] or [`Self::SignerInvocationFailed`] the
    /// original request is spent, since the nonce moved or was consumed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PendingExecutionExists { .. } | Self::StaleExecution { .. }
        ) || matches!(self.kind(), ErrorKind::Dependency)
    }
}

impl From<serde_json::Error> for AccountKitError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
