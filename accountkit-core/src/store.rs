//! `AccountStore` implementation for abstract accounts.
//!
//! The store owns every account record and a reverse index from credential
//! to account id. The index is derived state: every mutation updates it in
//! the same call as the account record, so no caller can observe the two
//! disagreeing. A credential maps to at most one account globally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    credential::Credential,
    error::{AccountKitError, Result},
    types::{Account, AccountId},
};

/// Maximum length of an account id in bytes.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

/// Serializable image of an [`AccountStore`].
///
/// Only account records are persisted. The reverse index is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStoreSnapshot {
    /// Accounts sorted by id.
    pub accounts: Vec<Account>,
}

/// Account records plus the credential reverse index.
#[derive(Debug, Clone, Default)]
pub struct AccountStore {
    accounts: HashMap<AccountId, Account>,
    index: HashMap<Credential, AccountId>,
}

impl AccountStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Two accounts share an id ([`AccountKitError::DuplicateAccount`])
    /// - An account has no credentials ([`AccountKitError::InvalidSnapshot`])
    /// - A credential appears on two accounts
    ///   ([`AccountKitError::CredentialAlreadyBound`])
    pub fn from_snapshot(snapshot: AccountStoreSnapshot) -> Result<Self> {
        let mut store = Self::new();
        for account in snapshot.accounts {
            if account.credentials.is_empty() {
                return Err(AccountKitError::InvalidSnapshot(format!(
                    "account {} has no credentials",
                    account.id
                )));
            }
            if store.accounts.contains_key(&account.id) {
                return Err(AccountKitError::DuplicateAccount {
                    account_id: account.id,
                });
            }
            for credential in &account.credentials {
                if let Some(owner) = store.index.get(credential) {
                    return Err(AccountKitError::CredentialAlreadyBound {
                        credential: credential.clone(),
                        account_id: owner.clone(),
                    });
                }
                store.index.insert(credential.clone(), account.id.clone());
            }
            store.accounts.insert(account.id.clone(), account);
        }
        Ok(store)
    }

    /// Returns a snapshot of all accounts, sorted by id.
    #[must_use]
    pub fn snapshot(&self) -> AccountStoreSnapshot {
        let mut accounts: Vec<Account> = self.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        AccountStoreSnapshot { accounts }
    }

    /// Creates an account with exactly one credential and nonce 0.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The id is malformed ([`AccountKitError::InvalidAccountId`])
    /// - The credential is malformed ([`AccountKitError::InvalidCredential`])
    /// - The id is taken ([`AccountKitError::DuplicateAccount`])
    /// - The credential is bound elsewhere
    ///   ([`AccountKitError::CredentialAlreadyBound`])
    pub fn create_account(
        &mut self,
        id: AccountId,
        initial_credential: Credential,
    ) -> Result<AccountId> {
        validate_account_id(&id)?;
        initial_credential.validate()?;

        if self.accounts.contains_key(&id) {
            return Err(AccountKitError::DuplicateAccount { account_id: id });
        }
        self.ensure_unbound(&initial_credential)?;

        debug!(account_id = %id, credential = %initial_credential, "creating account");
        self.index.insert(initial_credential.clone(), id.clone());
        self.accounts
            .insert(id.clone(), Account::new(id.clone(), initial_credential));
        Ok(id)
    }

    /// Looks up the account owning `credential`.
    #[must_use]
    pub fn resolve_by_credential(&self, credential: &Credential) -> Option<&Account> {
        self.index
            .get(credential)
            .and_then(|account_id| self.accounts.get(account_id))
    }

    /// Looks up an account by id.
    #[must_use]
    pub fn resolve_by_id(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    /// Returns the id of the account owning `credential`, if any.
    #[must_use]
    pub fn owner_of(&self, credential: &Credential) -> Option<&AccountId> {
        self.index.get(credential)
    }

    /// Adds a credential to an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the account does not exist, or if the credential
    /// is already bound to any account, this one included.
    pub fn bind_credential(&mut self, account_id: &AccountId, credential: Credential) -> Result<()> {
        self.ensure_unbound(&credential)?;
        let account = self.account_mut(account_id)?;
        account.credentials.insert(credential.clone());

        debug!(%account_id, %credential, "bound credential");
        self.index.insert(credential, account_id.clone());
        Ok(())
    }

    /// Removes a credential from an account.
    ///
    /// # Errors
    ///
    /// Returns an error if the account does not exist, the credential is
    /// not on the account, or it is the account's only credential. Deleting
    /// the account goes through [`AccountStore::delete_account`].
    pub fn unbind_credential(
        &mut self,
        account_id: &AccountId,
        credential: &Credential,
    ) -> Result<()> {
        let account = self.account_mut(account_id)?;
        if !account.credentials.contains(credential) {
            return Err(AccountKitError::CredentialNotFound {
                credential: credential.clone(),
                account_id: account_id.clone(),
            });
        }
        if account.credentials.len() == 1 {
            return Err(AccountKitError::LastCredentialRemoval {
                account_id: account_id.clone(),
            });
        }
        account.credentials.remove(credential);

        debug!(%account_id, %credential, "unbound credential");
        self.index.remove(credential);
        Ok(())
    }

    /// Deletes an account and releases all of its credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::AccountNotFound`] if the account does not exist.
    pub fn delete_account(&mut self, account_id: &AccountId) -> Result<Account> {
        let account = self
            .accounts
            .remove(account_id)
            .ok_or_else(|| not_found(account_id))?;
        for credential in &account.credentials {
            self.index.remove(credential);
        }

        debug!(%account_id, "deleted account");
        Ok(account)
    }

    /// Increments the account nonce and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::AccountNotFound`] if the account does not
    /// exist, or [`AccountKitError::NonceExhausted`] at `u64::MAX`.
    pub fn increment_nonce(&mut self, account_id: &AccountId) -> Result<u64> {
        let account = self.account_mut(account_id)?;
        account.nonce = account
            .nonce
            .checked_add(1)
            .ok_or_else(|| AccountKitError::NonceExhausted {
                account_id: account_id.clone(),
            })?;
        Ok(account.nonce)
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the store holds no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Iterates over all accounts in arbitrary order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    /// Checks that the reverse index matches the union of credential sets
    /// and that no account is empty.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let mut bound = 0usize;
        for account in self.accounts.values() {
            if account.credentials.is_empty() {
                return false;
            }
            for credential in &account.credentials {
                if self.index.get(credential) != Some(&account.id) {
                    return false;
                }
                bound += 1;
            }
        }
        bound == self.index.len()
    }

    fn ensure_unbound(&self, credential: &Credential) -> Result<()> {
        match self.index.get(credential) {
            Some(owner) => Err(AccountKitError::CredentialAlreadyBound {
                credential: credential.clone(),
                account_id: owner.clone(),
            }),
            None => Ok(()),
        }
    }

    fn account_mut(&mut self, account_id: &AccountId) -> Result<&mut Account> {
        self.accounts
            .get_mut(account_id)
            .ok_or_else(|| not_found(account_id))
    }
}

fn not_found(account_id: &AccountId) -> AccountKitError {
    AccountKitError::AccountNotFound {
        lookup: account_id.to_string(),
    }
}

fn validate_account_id(id: &AccountId) -> Result<()> {
    let id = id.as_str();
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.len() > MAX_ACCOUNT_ID_LEN {
        "longer than 64 bytes"
    } else if id.chars().any(char::is_whitespace) {
        "contains whitespace"
    } else {
        return Ok(());
    };
    Err(AccountKitError::InvalidAccountId {
        reason: reason.to_string(),
    })
}
