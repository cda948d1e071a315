//! Core type definitions for abstract accounts.
//!
//! This module contains the account record, the transaction and action
//! model, and the values exchanged with the external validator and signer.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::credential::Credential;

// Identifiers

/// Primary key of an account, assigned at creation and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates a new `AccountId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifies one dispatched verification.
///
/// A callback must present the ticket it was dispatched with, so a late
/// callback for an expired dispatch cannot finalize a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionTicket(pub u64);

impl fmt::Display for ExecutionTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// Account

/// An abstract account controlled by one or more credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Primary key.
    pub id: AccountId,
    /// Credentials that may authorize transactions. Never empty.
    pub credentials: BTreeSet<Credential>,
    /// Replay-protection counter, incremented once per executed transaction.
    pub nonce: u64,
}

impl Account {
    /// Creates an account with a single credential and nonce 0.
    #[must_use]
    pub fn new(id: AccountId, credential: Credential) -> Self {
        Self {
            id,
            credentials: BTreeSet::from([credential]),
            nonce: 0,
        }
    }

    /// Whether the credential belongs to this account.
    #[must_use]
    pub fn has_credential(&self, credential: &Credential) -> bool {
        self.credentials.contains(credential)
    }
}

// Transactions

/// A single mutation requested by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Bind another credential to the account.
    AddCredential(Credential),
    /// Unbind a credential from the account.
    RemoveCredential(Credential),
    /// Ask the remote signer to sign a payload under the target's path.
    InvokeSigner {
        /// The 32-byte value to sign.
        payload: [u8; 32],
        /// Version of the signer's root key.
        key_version: u32,
        /// Must equal the derivation path of the target credential.
        derivation_path: String,
    },
}

/// An ordered batch of actions bound to one account nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Must equal the account nonce when the transaction is submitted.
    pub nonce: u64,
    /// Applied in order. Earlier effects are visible to later actions.
    pub actions: Vec<Action>,
}

/// A relayed request to execute a transaction on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Signed message. Must embed the transaction digest.
    pub message: String,
    /// Proof over `message` produced by the claimant credential.
    pub message_signature: String,
    /// The transaction to execute.
    pub transaction: Transaction,
    /// Identifies the account and is the credential whose proof is checked.
    pub claimant_credential: Credential,
    /// Scopes any `InvokeSigner` action. May equal the claimant.
    pub target_credential: Credential,
}

// Collaborator values

/// A verification call for the external credential validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationDispatch {
    /// Ticket the callback must present.
    pub ticket: ExecutionTicket,
    /// Account the pending execution belongs to.
    pub account_id: AccountId,
    /// Message to verify.
    pub message: String,
    /// Signature over the message.
    pub message_signature: String,
    /// Credential the signature must be checked against.
    pub credential: Credential,
}

/// An ECDSA signature produced by the remote signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// Hex-encoded `r` component.
    pub r: String,
    /// Hex-encoded `s` component.
    pub s: String,
    /// Recovery id.
    pub recovery_id: u8,
}

/// Outcome of a successfully finalized execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// The account the transaction ran on.
    pub account_id: AccountId,
    /// Account nonce after the transaction.
    pub nonce: u64,
    /// One entry per `InvokeSigner` action, in action order.
    pub signatures: Vec<SignatureResponse>,
}
