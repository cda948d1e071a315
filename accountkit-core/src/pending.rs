//! Pending executions.
//!
//! A pending execution records that a verification call was dispatched for
//! an account and has not been resolved. At most one exists per account;
//! while it exists, no other transaction may start on that account.
//!
//! Entries expire after a TTL so a lost callback cannot block an account
//! forever. An expired entry is treated as released: a new request may
//! replace it, and its late callback is rejected.
//!
//! Once an entry is applying, the credentials its transaction adds are
//! reserved until it is released. No other account may claim them in the
//! meantime, so the transaction cannot fail halfway on a lost binding.

use std::collections::{BTreeSet, HashMap};

use crate::{
    credential::Credential,
    types::{AccountId, ExecutionTicket, Transaction},
};

/// Default TTL for pending executions in seconds.
pub const PENDING_TTL_SECONDS: u64 = 900;

/// Where a pending execution is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Waiting for the validator's verdict.
    Dispatched,
    /// Verdict accepted; actions are being applied.
    Applying,
}

/// The suspended state of one in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExecution {
    /// Ticket handed out at dispatch.
    pub ticket: ExecutionTicket,
    /// Guarded account.
    pub account_id: AccountId,
    /// Credential whose proof is being verified.
    pub claimant_credential: Credential,
    /// The transaction awaiting verification.
    pub transaction: Transaction,
    /// Target captured at dispatch. Later actions resolve against it even
    /// if the transaction removes it.
    pub target_credential: Credential,
    /// Digest the signed message embedded.
    pub digest: String,
    /// Current phase.
    pub phase: ExecutionPhase,
    /// Credentials the transaction adds, reserved while applying.
    pub reserved: BTreeSet<Credential>,
    /// Unix timestamp of dispatch.
    pub dispatched_at: u64,
    /// Unix timestamp after which the entry no longer guards the account.
    pub expires_at: u64,
}

impl PendingExecution {
    /// Checks if this entry has expired.
    ///
    /// An entry that is already applying never expires; its guard is
    /// released by the coordinator when the executor returns.
    #[must_use]
    pub const fn is_expired(&self, now: u64) -> bool {
        matches!(self.phase, ExecutionPhase::Dispatched) && self.expires_at <= now
    }
}

/// Pending executions keyed by account.
#[derive(Debug, Default)]
pub struct PendingExecutions {
    entries: HashMap<AccountId, PendingExecution>,
    reservations: HashMap<Credential, AccountId>,
}

impl PendingExecutions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry guarding `account_id`.
    #[must_use]
    pub fn get(&self, account_id: &AccountId) -> Option<&PendingExecution> {
        self.entries.get(account_id)
    }

    /// Inserts an entry, returning `false` if the account is already guarded
    /// by an entry that has not expired.
    ///
    /// An expired entry is replaced.
    pub fn insert(&mut self, entry: PendingExecution, now: u64) -> bool {
        if let Some(existing) = self.entries.get(&entry.account_id) {
            if !existing.is_expired(now) {
                return false;
            }
        }
        self.entries.insert(entry.account_id.clone(), entry);
        true
    }

    /// Moves a dispatched entry to [`ExecutionPhase::Applying`] and
    /// reserves `reserved` for it.
    ///
    /// Returns `false` if no dispatched entry with this ticket exists.
    pub fn mark_applying(
        &mut self,
        account_id: &AccountId,
        ticket: ExecutionTicket,
        reserved: BTreeSet<Credential>,
    ) -> bool {
        match self.entries.get_mut(account_id) {
            Some(entry) if entry.ticket == ticket && entry.phase == ExecutionPhase::Dispatched => {
                for credential in &reserved {
                    self.reservations
                        .insert(credential.clone(), account_id.clone());
                }
                entry.phase = ExecutionPhase::Applying;
                entry.reserved = reserved;
                true
            }
            _ => false,
        }
    }

    /// Returns the account holding a reservation on `credential`.
    #[must_use]
    pub fn reserved_by(&self, credential: &Credential) -> Option<&AccountId> {
        self.reservations.get(credential)
    }

    /// Whether `account_id` has an entry that is applying.
    #[must_use]
    pub fn is_applying(&self, account_id: &AccountId) -> bool {
        self.entries
            .get(account_id)
            .is_some_and(|entry| entry.phase == ExecutionPhase::Applying)
    }

    /// Removes the entry for `account_id` if it carries `ticket`, along with
    /// its reservations.
    pub fn release(
        &mut self,
        account_id: &AccountId,
        ticket: ExecutionTicket,
    ) -> Option<PendingExecution> {
        if self.entries.get(account_id)?.ticket != ticket {
            return None;
        }
        let entry = self.entries.remove(account_id)?;
        for credential in &entry.reserved {
            self.reservations.remove(credential);
        }
        Some(entry)
    }

    /// Removes expired entries and returns the accounts they guarded.
    pub fn prune_expired(&mut self, now: u64) -> Vec<AccountId> {
        let expired: Vec<AccountId> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.account_id.clone())
            .collect();
        for account_id in &expired {
            if let Some(entry) = self.entries.remove(account_id) {
                for credential in &entry.reserved {
                    self.reservations.remove(credential);
                }
            }
        }
        expired
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
