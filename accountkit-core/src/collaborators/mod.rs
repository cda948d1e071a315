//! Interfaces to the services the execution core depends on.
//!
//! The credential validators and the remote signer are external: this crate
//! only defines the contracts they must satisfy and how they are reached.
//! Both calls may suspend; they are the only suspension points of an
//! execution.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::{
    credential::{Credential, CredentialKind},
    error::{AccountKitError, Result},
    types::{SignatureResponse, VerificationDispatch},
};

pub mod memory;

/// Verifies a signed message against one kind of credential.
///
/// Implementations may call further services (for example to fetch an
/// identity provider's keys). Returning `Ok(false)` means the proof was
/// checked and rejected; `Err` means the check itself could not be done.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Checks `signature` over `message` for `credential`.
    ///
    /// # Errors
    ///
    /// Returns an error if the verification could not be performed.
    async fn verify(&self, message: &str, signature: &str, credential: &Credential)
        -> Result<bool>;
}

/// Remote multi-chain signer.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Signs `payload` with the key derived from `derivation_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signer is unreachable or refuses the request.
    async fn sign(
        &self,
        payload: [u8; 32],
        key_version: u32,
        derivation_path: &str,
    ) -> Result<SignatureResponse>;
}

/// Source of Unix timestamps in seconds.
pub trait Clock: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }
}

/// One validator per credential kind.
///
/// Verification is routed by an exhaustive match on [`CredentialKind`], so
/// adding a credential variant forces a decision here.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    public_key: Option<Arc<dyn CredentialValidator>>,
    webauthn: Option<Arc<dyn CredentialValidator>>,
    federated_identity: Option<Arc<dyn CredentialValidator>>,
    ledger_account: Option<Arc<dyn CredentialValidator>>,
}

impl ValidatorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `validator` for every credential kind.
    #[must_use]
    pub fn uniform(validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            public_key: Some(Arc::clone(&validator)),
            webauthn: Some(Arc::clone(&validator)),
            federated_identity: Some(Arc::clone(&validator)),
            ledger_account: Some(validator),
        }
    }

    /// Registers `validator` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, kind: CredentialKind, validator: Arc<dyn CredentialValidator>) -> Self {
        *self.slot_mut(kind) = Some(validator);
        self
    }

    /// Returns the validator for `kind`.
    #[must_use]
    pub fn get(&self, kind: CredentialKind) -> Option<&Arc<dyn CredentialValidator>> {
        match kind {
            CredentialKind::PublicKey => self.public_key.as_ref(),
            CredentialKind::WebAuthn => self.webauthn.as_ref(),
            CredentialKind::FederatedIdentity => self.federated_identity.as_ref(),
            CredentialKind::LedgerAccount => self.ledger_account.as_ref(),
        }
    }

    /// Routes a dispatched verification to the matching validator.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::ValidatorInvocationFailed`] if no validator
    /// is registered for the credential kind or the validator fails.
    pub async fn verify(&self, dispatch: &VerificationDispatch) -> Result<bool> {
        let kind = dispatch.credential.kind();
        let validator = self.get(kind).ok_or_else(|| {
            AccountKitError::ValidatorInvocationFailed(format!("no validator registered for {kind}"))
        })?;
        validator
            .verify(
                &dispatch.message,
                &dispatch.message_signature,
                &dispatch.credential,
            )
            .await
            .map_err(|err| match err {
                AccountKitError::ValidatorInvocationFailed(_) => err,
                other => AccountKitError::ValidatorInvocationFailed(other.to_string()),
            })
    }

    fn slot_mut(&mut self, kind: CredentialKind) -> &mut Option<Arc<dyn CredentialValidator>> {
        match kind {
            CredentialKind::PublicKey => &mut self.public_key,
            CredentialKind::WebAuthn => &mut self.webauthn,
            CredentialKind::FederatedIdentity => &mut self.federated_identity,
            CredentialKind::LedgerAccount => &mut self.ledger_account,
        }
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("public_key", &self.public_key.is_some())
            .field("webauthn", &self.webauthn.is_some())
            .field("federated_identity", &self.federated_identity.is_some())
            .field("ledger_account", &self.ledger_account.is_some())
            .finish()
    }
}
