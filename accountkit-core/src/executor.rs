//! Action executor.
//!
//! Applies the actions of a verified transaction in order. Execution has two
//! stages:
//!
//! 1. [`ActionExecutor::plan`] replays the whole sequence against a scratch
//!    copy of the account's credential set, the live reverse index and the
//!    credentials reserved by other applying executions. Every structural
//!    failure is reported here, before any write.
//! 2. `apply` performs the writes and signer calls. The ledger lock is taken
//!    once per store write and is never held across a signer call.
//!
//! A signer failure in stage 2 does not roll back earlier actions.

use std::{collections::BTreeSet, sync::Mutex};

use tracing::{debug, warn};

use crate::{
    collaborators::Signer,
    coordinator::{lock_ledger, Ledger},
    credential::Credential,
    derivation::derive_path,
    error::{AccountKitError, Result},
    pending::PendingExecutions,
    store::AccountStore,
    types::{AccountId, Action, SignatureResponse},
};

/// Applies transaction actions against the account store and the signer.
pub struct ActionExecutor<'a> {
    signer: &'a dyn Signer,
}

impl<'a> ActionExecutor<'a> {
    /// Creates an executor that signs through `signer`.
    #[must_use]
    pub const fn new(signer: &'a dyn Signer) -> Self {
        Self { signer }
    }

    /// Checks that `actions` can be applied to the account in order and
    /// returns the credentials the sequence adds.
    ///
    /// Effects of earlier actions are visible to later ones, so removing a
    /// credential and adding it back in the same transaction is accepted.
    /// `InvokeSigner` paths are checked against `target`, which is fixed for
    /// the whole transaction.
    ///
    /// # Errors
    ///
    /// Returns the first failure the sequence would hit:
    /// - [`AccountKitError::AccountNotFound`] if the account is missing
    /// - [`AccountKitError::InvalidCredential`] for a malformed added credential
    /// - [`AccountKitError::CredentialAlreadyBound`] if an added credential is
    ///   held by any account at that point in the sequence, or reserved by
    ///   another account's applying execution
    /// - [`AccountKitError::CredentialNotFound`] or
    ///   [`AccountKitError::LastCredentialRemoval`] for a bad removal
    /// - [`AccountKitError::DerivationPathMismatch`] for a foreign path
    pub fn plan(
        store: &AccountStore,
        pending: &PendingExecutions,
        account_id: &AccountId,
        target: &Credential,
        actions: &[Action],
    ) -> Result<BTreeSet<Credential>> {
        let account = store
            .resolve_by_id(account_id)
            .ok_or_else(|| AccountKitError::AccountNotFound {
                lookup: account_id.to_string(),
            })?;
        let mut credentials: BTreeSet<&Credential> = account.credentials.iter().collect();
        let expected_path = derive_path(target);
        let mut added = BTreeSet::new();

        for action in actions {
            match action {
                Action::AddCredential(credential) => {
                    credential.validate()?;
                    let owner = if credentials.contains(credential) {
                        Some(account_id)
                    } else {
                        // Held by this account only if removed earlier in the sequence.
                        store
                            .owner_of(credential)
                            .or_else(|| pending.reserved_by(credential))
                            .filter(|owner| *owner != account_id)
                    };
                    if let Some(owner) = owner {
                        return Err(AccountKitError::CredentialAlreadyBound {
                            credential: credential.clone(),
                            account_id: owner.clone(),
                        });
                    }
                    credentials.insert(credential);
                    added.insert(credential.clone());
                }
                Action::RemoveCredential(credential) => {
                    if !credentials.contains(credential) {
                        return Err(AccountKitError::CredentialNotFound {
                            credential: credential.clone(),
                            account_id: account_id.clone(),
                        });
                    }
                    if credentials.len() == 1 {
                        return Err(AccountKitError::LastCredentialRemoval {
                            account_id: account_id.clone(),
                        });
                    }
                    credentials.remove(credential);
                }
                Action::InvokeSigner {
                    derivation_path, ..
                } => {
                    if *derivation_path != expected_path {
                        return Err(AccountKitError::DerivationPathMismatch {
                            expected: expected_path,
                            found: derivation_path.clone(),
                        });
                    }
                }
            }
        }
        Ok(added)
    }

    /// Applies a planned sequence and returns one signature per
    /// `InvokeSigner` action, in order.
    ///
    /// A failing action stops the sequence. Actions before it stay applied.
    pub(crate) async fn apply(
        &self,
        ledger: &Mutex<Ledger>,
        account_id: &AccountId,
        target: &Credential,
        actions: &[Action],
    ) -> Result<Vec<SignatureResponse>> {
        let path = derive_path(target);
        let mut signatures = Vec::new();

        for (index, action) in actions.iter().enumerate() {
            match action {
                Action::AddCredential(credential) => {
                    let mut ledger = lock_ledger(ledger);
                    ledger.store.bind_credential(account_id, credential.clone())?;
                }
                Action::RemoveCredential(credential) => {
                    let mut ledger = lock_ledger(ledger);
                    ledger.store.unbind_credential(account_id, credential)?;
                }
                Action::InvokeSigner {
                    payload,
                    key_version,
                    ..
                } => {
                    debug!(%account_id, action_index = index, key_version, "invoking signer");
                    let signature = self
                        .signer
                        .sign(*payload, *key_version, &path)
                        .await
                        .map_err(|err| {
                            let reason = match err {
                                AccountKitError::SignerInvocationFailed { reason, .. } => reason,
                                other => other.to_string(),
                            };
                            warn!(%account_id, action_index = index, %reason, "signer failed");
                            AccountKitError::SignerInvocationFailed {
                                action_index: index,
                                reason,
                            }
                        })?;
                    signatures.push(signature);
                }
            }
        }
        Ok(signatures)
    }
}
