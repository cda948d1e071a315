//! Execution core for multi-credential abstract accounts.
//!
//! An abstract account is a single record that any of several heterogeneous
//! credentials (public keys, passkeys, federated identities, other ledger
//! accounts) can control. The core resolves requests to accounts, binds each
//! signed message to one transaction and one nonce, and applies transactions
//! only after an external validator has accepted the signature.
//!
//! Start with [`ExecutionCoordinator`].
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod credential;
pub mod derivation;
pub mod executor;
pub mod logger;
pub mod pending;
pub mod store;
pub mod types;

mod error;
pub use error::*;

pub use collaborators::{Clock, CredentialValidator, Signer, SystemClock, ValidatorRegistry};
pub use config::ExecutionConfig;
pub use coordinator::ExecutionCoordinator;
pub use credential::{Credential, CredentialKind};
pub use store::{AccountStore, AccountStoreSnapshot};
pub use types::*;
