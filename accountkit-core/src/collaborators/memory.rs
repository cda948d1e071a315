//! In-memory collaborator implementations.
//!
//! These are intended for tests and local dry runs. They perform no real
//! cryptography.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Mutex, PoisonError,
};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{Clock, CredentialValidator, Signer};
use crate::{
    credential::Credential,
    error::{AccountKitError, Result},
    types::SignatureResponse,
};

// =============================================================================
// Validator
// =============================================================================

/// Validator that returns a fixed verdict and counts its calls.
#[derive(Debug, Default)]
pub struct StaticValidator {
    verdict: AtomicBool,
    calls: AtomicUsize,
}

impl StaticValidator {
    /// Creates a validator returning `verdict`.
    #[must_use]
    pub const fn new(verdict: bool) -> Self {
        Self {
            verdict: AtomicBool::new(verdict),
            calls: AtomicUsize::new(0),
        }
    }

    /// Changes the verdict for subsequent calls.
    pub fn set_verdict(&self, verdict: bool) {
        self.verdict.store(verdict, Ordering::SeqCst);
    }

    /// Number of `verify` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialValidator for StaticValidator {
    async fn verify(
        &self,
        _message: &str,
        _signature: &str,
        _credential: &Credential,
    ) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Signer
// =============================================================================

/// A sign request captured by [`RecordingSigner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Payload that was signed.
    pub payload: [u8; 32],
    /// Requested key version.
    pub key_version: u32,
    /// Path the key was derived from.
    pub derivation_path: String,
}

/// Signer that records every request.
///
/// Responses are a deterministic function of the request, so repeated runs
/// produce identical receipts. A failure can be injected to exercise the
/// partial-application path.
#[derive(Debug, Default)]
pub struct RecordingSigner {
    requests: Mutex<Vec<SignRequest>>,
    failure: Mutex<Option<String>>,
}

impl RecordingSigner {
    /// Creates a signer that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent calls fail with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Returns the requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SignRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn sign(
        &self,
        payload: [u8; 32],
        key_version: u32,
        derivation_path: &str,
    ) -> Result<SignatureResponse> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SignRequest {
                payload,
                key_version,
                derivation_path: derivation_path.to_string(),
            });

        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(AccountKitError::SignerInvocationFailed {
                action_index: 0,
                reason,
            });
        }

        let component = |label: &[u8]| {
            let mut hasher = Sha256::new();
            hasher.update(label);
            hasher.update(key_version.to_le_bytes());
            hasher.update(derivation_path.as_bytes());
            hasher.update(payload);
            hasher.finalize()
        };
        let r = component(b"accountkit:memory-signer:r");
        let s = component(b"accountkit:memory-signer:s");

        Ok(SignatureResponse {
            r: hex::encode(r),
            s: hex::encode(s),
            recovery_id: r[0] & 1,
        })
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `now`.
    #[must_use]
    pub const fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Moves the clock forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
