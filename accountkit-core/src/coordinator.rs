//! Execution coordinator.
//!
//! The coordinator is the entry point of the core. It resolves requests to
//! accounts, enforces replay protection and authorization scope, and runs
//! each transaction in two phases:
//!
//! 1. [`ExecutionCoordinator::begin_execute`] validates the request, records
//!    a pending execution under the account's guard and returns the
//!    verification call to dispatch.
//! 2. [`ExecutionCoordinator::execute_callback`] receives the verdict,
//!    re-validates the account and applies the transaction.
//!
//! Any number of other calls may run between the two phases. While an
//! account is guarded, no other transaction can start on it; other accounts
//! are unaffected. [`ExecutionCoordinator::execute`] drives both phases
//! through a [`ValidatorRegistry`].

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tracing::{info, warn};

use crate::{
    collaborators::{Clock, Signer, SystemClock, ValidatorRegistry},
    config::ExecutionConfig,
    credential::Credential,
    derivation::{derive_path, message_embeds_digest, transaction_digest},
    error::{AccountKitError, Result},
    executor::ActionExecutor,
    pending::{ExecutionPhase, PendingExecution, PendingExecutions},
    store::{AccountStore, AccountStoreSnapshot},
    types::{
        Account, AccountId, ExecutionReceipt, ExecutionRequest, ExecutionTicket,
        VerificationDispatch,
    },
};

/// Account records and pending executions, guarded by one lock.
///
/// Every critical section leaves both consistent before it can fail, so a
/// poisoned lock is recovered rather than propagated.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    pub(crate) store: AccountStore,
    pub(crate) pending: PendingExecutions,
}

impl Ledger {
    pub(crate) fn new(store: AccountStore) -> Self {
        Self {
            store,
            pending: PendingExecutions::new(),
        }
    }
}

pub(crate) fn lock_ledger(ledger: &Mutex<Ledger>) -> MutexGuard<'_, Ledger> {
    ledger.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases an applying execution when dropped, including when the
/// callback future is cancelled mid-way.
struct ApplyingGuard<'a> {
    ledger: &'a Mutex<Ledger>,
    account_id: &'a AccountId,
    ticket: ExecutionTicket,
}

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        lock_ledger(self.ledger)
            .pending
            .release(self.account_id, self.ticket);
    }
}

/// Two-phase execution state machine over an [`AccountStore`].
pub struct ExecutionCoordinator {
    ledger: Mutex<Ledger>,
    validators: ValidatorRegistry,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    config: ExecutionConfig,
    next_ticket: AtomicU64,
}

impl ExecutionCoordinator {
    /// Creates a coordinator with an empty store, default configuration and
    /// the system clock.
    #[must_use]
    pub fn new(validators: ValidatorRegistry, signer: Arc<dyn Signer>) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            validators,
            signer,
            clock: Arc::new(SystemClock),
            config: ExecutionConfig::default(),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Replaces the account store, for example one loaded from a snapshot.
    #[must_use]
    pub fn with_store(self, store: AccountStore) -> Self {
        Self {
            ledger: Mutex::new(Ledger::new(store)),
            ..self
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(self, config: ExecutionConfig) -> Self {
        Self { config, ..self }
    }

    /// Replaces the clock used for guard expiry.
    #[must_use]
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        lock_ledger(&self.ledger)
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Creates an account with a single credential.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::CredentialAlreadyBound`] if the credential
    /// is reserved by an applying execution, otherwise see
    /// [`AccountStore::create_account`].
    pub fn create_account(
        &self,
        account_id: AccountId,
        initial_credential: Credential,
    ) -> Result<AccountId> {
        let mut ledger = self.ledger();
        if let Some(reserver) = ledger.pending.reserved_by(&initial_credential) {
            return Err(AccountKitError::CredentialAlreadyBound {
                credential: initial_credential,
                account_id: reserver.clone(),
            });
        }
        let account_id = ledger.store.create_account(account_id, initial_credential)?;
        drop(ledger);

        info!(%account_id, "account created");
        Ok(account_id)
    }

    /// Deletes an account and releases its credentials.
    ///
    /// A dispatched execution on the account is left in place; its callback
    /// reports [`AccountKitError::StaleExecution`].
    ///
    /// # Errors
    ///
    /// - [`AccountKitError::PendingExecutionExists`] while an execution on
    ///   the account is applying
    /// - [`AccountKitError::AccountNotFound`] if the account does not exist
    pub fn delete_account(&self, account_id: &AccountId) -> Result<Account> {
        let mut ledger = self.ledger();
        if ledger.pending.is_applying(account_id) {
            return Err(AccountKitError::PendingExecutionExists {
                account_id: account_id.clone(),
            });
        }
        let account = ledger.store.delete_account(account_id)?;
        drop(ledger);

        info!(%account_id, "account deleted");
        Ok(account)
    }

    /// Returns the account owning `credential`.
    #[must_use]
    pub fn resolve_by_credential(&self, credential: &Credential) -> Option<Account> {
        self.ledger().store.resolve_by_credential(credential).cloned()
    }

    /// Returns the account with id `account_id`.
    #[must_use]
    pub fn resolve_by_id(&self, account_id: &AccountId) -> Option<Account> {
        self.ledger().store.resolve_by_id(account_id).cloned()
    }

    /// Returns the signer derivation path for `credential`.
    #[must_use]
    pub fn derive_key_from_credential(credential: &Credential) -> String {
        derive_path(credential)
    }

    /// Returns a snapshot of every account.
    #[must_use]
    pub fn snapshot(&self) -> AccountStoreSnapshot {
        self.ledger().store.snapshot()
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Validates `request` and places the resolved account under guard.
    ///
    /// Checks run in this order: account resolution, guard, nonce, target
    /// scope, digest binding, action count, action plan. Nothing is recorded
    /// unless all of them pass. The returned dispatch must be verified by the
    /// validator for the claimant's credential kind and its verdict passed to
    /// [`Self::execute_callback`] together with the ticket.
    ///
    /// # Errors
    ///
    /// - [`AccountKitError::AccountNotFound`] if no account owns the claimant
    /// - [`AccountKitError::PendingExecutionExists`] if the account is guarded
    /// - [`AccountKitError::NonceMismatch`] for a stale or future nonce
    /// - [`AccountKitError::UnauthorizedTarget`] if the target is not on the account
    /// - [`AccountKitError::MessageMismatch`] if the message does not embed
    ///   the transaction digest
    /// - [`AccountKitError::TooManyActions`] above the configured limit
    /// - any error of [`ActionExecutor::plan`]
    pub fn begin_execute(&self, request: ExecutionRequest) -> Result<VerificationDispatch> {
        self.try_begin_execute(request).inspect_err(|err| {
            warn!(error = %err, kind = %err.kind(), "execution request rejected");
        })
    }

    fn try_begin_execute(&self, request: ExecutionRequest) -> Result<VerificationDispatch> {
        let now = self.clock.now();
        let mut ledger = self.ledger();

        let account = ledger
            .store
            .resolve_by_credential(&request.claimant_credential)
            .ok_or_else(|| AccountKitError::AccountNotFound {
                lookup: request.claimant_credential.to_string(),
            })?;
        let account_id = account.id.clone();

        if let Some(existing) = ledger.pending.get(&account_id) {
            if !existing.is_expired(now) {
                return Err(AccountKitError::PendingExecutionExists { account_id });
            }
            warn!(
                %account_id,
                ticket = %existing.ticket,
                dispatched_at = existing.dispatched_at,
                "evicting expired pending execution"
            );
        }

        if account.nonce != request.transaction.nonce {
            return Err(AccountKitError::NonceMismatch {
                expected: account.nonce,
                found: request.transaction.nonce,
            });
        }

        if !account.has_credential(&request.target_credential) {
            return Err(AccountKitError::UnauthorizedTarget {
                credential: request.target_credential,
                account_id,
            });
        }

        let digest = transaction_digest(&request.transaction)?;
        if !message_embeds_digest(&request.message, &digest) {
            return Err(AccountKitError::MessageMismatch {
                expected_digest: digest,
            });
        }

        let count = request.transaction.actions.len();
        let limit = self.config.max_actions_per_transaction;
        if count > limit {
            return Err(AccountKitError::TooManyActions { count, limit });
        }

        ActionExecutor::plan(
            &ledger.store,
            &ledger.pending,
            &account_id,
            &request.target_credential,
            &request.transaction.actions,
        )?;

        let ticket = ExecutionTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let entry = PendingExecution {
            ticket,
            account_id: account_id.clone(),
            claimant_credential: request.claimant_credential.clone(),
            transaction: request.transaction,
            target_credential: request.target_credential,
            digest,
            phase: ExecutionPhase::Dispatched,
            reserved: BTreeSet::new(),
            dispatched_at: now,
            expires_at: now.saturating_add(self.config.pending_ttl_secs),
        };
        let nonce = entry.transaction.nonce;
        let digest = entry.digest.clone();
        if !ledger.pending.insert(entry, now) {
            return Err(AccountKitError::PendingExecutionExists { account_id });
        }
        drop(ledger);

        info!(%account_id, %ticket, nonce, %digest, "verification dispatched");
        Ok(VerificationDispatch {
            ticket,
            account_id,
            message: request.message,
            message_signature: request.message_signature,
            credential: request.claimant_credential,
        })
    }

    /// Finalizes a dispatched execution with the validator's verdict.
    ///
    /// On a positive verdict the nonce is incremented and the transaction's
    /// actions are applied in order. The guard is released in every case.
    ///
    /// # Errors
    ///
    /// - [`AccountKitError::NoPendingExecution`] if no dispatched execution
    ///   with this ticket exists, or it expired
    /// - [`AccountKitError::StaleExecution`] if, while verification was
    ///   outstanding, the account was deleted, its nonce moved, or the
    ///   claimant or target credential left it
    /// - [`AccountKitError::NonceExhausted`] if the nonce is at its maximum
    /// - [`AccountKitError::AuthorizationFailed`] if `verified` is false
    /// - any error of [`ActionExecutor::plan`], with the nonce unchanged
    /// - [`AccountKitError::SignerInvocationFailed`] if a signer call fails;
    ///   earlier actions stay applied and the nonce stays incremented
    pub async fn execute_callback(
        &self,
        account_id: &AccountId,
        ticket: ExecutionTicket,
        verified: bool,
    ) -> Result<ExecutionReceipt> {
        self.try_execute_callback(account_id, ticket, verified)
            .await
            .inspect(|receipt| {
                info!(%account_id, %ticket, nonce = receipt.nonce, "execution finalized");
            })
            .inspect_err(|err| {
                warn!(%account_id, %ticket, error = %err, kind = %err.kind(), "execution failed");
            })
    }

    async fn try_execute_callback(
        &self,
        account_id: &AccountId,
        ticket: ExecutionTicket,
        verified: bool,
    ) -> Result<ExecutionReceipt> {
        let (nonce, pending) = self.start_applying(account_id, ticket, verified)?;
        let _guard = ApplyingGuard {
            ledger: &self.ledger,
            account_id,
            ticket,
        };

        let signatures = ActionExecutor::new(self.signer.as_ref())
            .apply(
                &self.ledger,
                account_id,
                &pending.target_credential,
                &pending.transaction.actions,
            )
            .await?;

        Ok(ExecutionReceipt {
            account_id: account_id.clone(),
            nonce,
            signatures,
        })
    }

    /// Validates the callback and commits the nonce under one lock.
    ///
    /// Every failure releases the guard.
    fn start_applying(
        &self,
        account_id: &AccountId,
        ticket: ExecutionTicket,
        verified: bool,
    ) -> Result<(u64, PendingExecution)> {
        let now = self.clock.now();
        let mut ledger = self.ledger();
        let ledger = &mut *ledger;

        let pending = match ledger.pending.get(account_id) {
            Some(entry) if entry.ticket == ticket && entry.phase == ExecutionPhase::Dispatched => {
                entry.clone()
            }
            _ => {
                return Err(AccountKitError::NoPendingExecution {
                    account_id: account_id.clone(),
                })
            }
        };

        if pending.is_expired(now) {
            ledger.pending.release(account_id, ticket);
            warn!(
                %account_id,
                %ticket,
                digest = %pending.digest,
                dispatched_at = pending.dispatched_at,
                "callback arrived after the pending execution expired"
            );
            return Err(AccountKitError::NoPendingExecution {
                account_id: account_id.clone(),
            });
        }

        // A deleted and re-created account keeps its id, so ownership of the
        // claimant and the target is re-checked as well as the nonce.
        let stale = match ledger.store.resolve_by_id(account_id) {
            None => Some("account no longer exists".to_string()),
            Some(account) if account.nonce != pending.transaction.nonce => Some(format!(
                "nonce moved from {} to {}",
                pending.transaction.nonce, account.nonce
            )),
            Some(account) if !account.has_credential(&pending.claimant_credential) => {
                Some("claimant credential no longer controls the account".to_string())
            }
            Some(account) if !account.has_credential(&pending.target_credential) => {
                Some("target credential no longer on the account".to_string())
            }
            Some(_) => None,
        };
        if let Some(reason) = stale {
            ledger.pending.release(account_id, ticket);
            return Err(AccountKitError::StaleExecution {
                account_id: account_id.clone(),
                reason,
            });
        }

        if !verified {
            ledger.pending.release(account_id, ticket);
            return Err(AccountKitError::AuthorizationFailed {
                account_id: account_id.clone(),
            });
        }

        let committed = ActionExecutor::plan(
            &ledger.store,
            &ledger.pending,
            account_id,
            &pending.target_credential,
            &pending.transaction.actions,
        )
        .and_then(|reserved| {
            let nonce = ledger.store.increment_nonce(account_id)?;
            Ok((nonce, reserved))
        });
        let (nonce, reserved) = match committed {
            Ok(committed) => committed,
            Err(err) => {
                ledger.pending.release(account_id, ticket);
                return Err(err);
            }
        };

        ledger.pending.mark_applying(account_id, ticket, reserved);
        Ok((nonce, pending))
    }

    /// Runs both phases, verifying through the validator registry.
    ///
    /// # Errors
    ///
    /// Any error of [`Self::begin_execute`] or [`Self::execute_callback`], or
    /// [`AccountKitError::ValidatorInvocationFailed`] if the validator could
    /// not be reached. In that case the guard is released.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionReceipt> {
        let dispatch = self.begin_execute(request)?;

        let verified = match self.validators.verify(&dispatch).await {
            Ok(verified) => verified,
            Err(err) => {
                warn!(account_id = %dispatch.account_id, error = %err, "validator failed");
                // The guard may already have expired and been replaced.
                let _ = self.abort_execute(&dispatch.account_id, dispatch.ticket);
                return Err(err);
            }
        };

        self.execute_callback(&dispatch.account_id, dispatch.ticket, verified)
            .await
    }

    /// Releases a dispatched execution without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::NoPendingExecution`] if no dispatched
    /// execution with this ticket exists. An execution that is already
    /// applying cannot be aborted.
    pub fn abort_execute(&self, account_id: &AccountId, ticket: ExecutionTicket) -> Result<()> {
        let mut ledger = self.ledger();
        let dispatched = ledger
            .pending
            .get(account_id)
            .is_some_and(|entry| entry.ticket == ticket && entry.phase == ExecutionPhase::Dispatched);
        if !dispatched {
            return Err(AccountKitError::NoPendingExecution {
                account_id: account_id.clone(),
            });
        }
        ledger.pending.release(account_id, ticket);
        drop(ledger);

        info!(%account_id, %ticket, "pending execution aborted");
        Ok(())
    }

    /// Returns a copy of the pending execution guarding `account_id`.
    #[must_use]
    pub fn pending_execution(&self, account_id: &AccountId) -> Option<PendingExecution> {
        self.ledger().pending.get(account_id).cloned()
    }

    /// Releases every expired pending execution and returns the freed accounts.
    pub fn prune_expired_executions(&self) -> Vec<AccountId> {
        let now = self.clock.now();
        let expired = self.ledger().pending.prune_expired(now);
        for account_id in &expired {
            warn!(%account_id, "pruned expired pending execution");
        }
        expired
    }
}

impl std::fmt::Debug for ExecutionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCoordinator")
            .field("validators", &self.validators)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
