//! Deterministic derivations for accounts.
//!
//! This module provides:
//!
//! - Derivation paths handed to the remote signer
//! - Transaction digests that signed messages must embed
//!
//! Both outputs are consumed outside this crate (addresses on other chains,
//! signatures produced by wallets), so their formats are frozen.

use sha2::{Digest, Sha256};

use crate::{credential::Credential, error::Result, types::Transaction};

// Domain Separation Labels

/// Label for computing transaction digests.
const LABEL_TRANSACTION: &[u8] = b"accountkit:transaction";

// Derivation Paths

/// Derives the signer path for a credential.
///
/// The path is the credential's canonical string:
/// ```text
/// pk,<key>
/// webauthn,<key_id>,<public_key>
/// oidc,<issuer>,<client_id>,<subject_email>
/// account,<account_id>
/// ```
/// Downstream chains compute addresses from this path. Changing it breaks
/// every account derived so far.
#[must_use]
pub fn derive_path(credential: &Credential) -> String {
    credential.canonical_string()
}

// Transaction Digest

/// Computes the digest a signed message must embed to authorize `transaction`.
///
/// ```text
/// digest = hex(SHA256("accountkit:transaction" || json(transaction)))
/// ```
///
/// `json` is the compact `serde_json` encoding. The transaction contains no
/// maps, so field order is fixed and the encoding is deterministic.
///
/// # Errors
///
/// Returns [`crate::AccountKitError::Serialization`] if the transaction
/// cannot be encoded.
pub fn transaction_digest(transaction: &Transaction) -> Result<String> {
    let encoded = serde_json::to_vec(transaction)?;

    let mut hasher = Sha256::new();
    hasher.update(LABEL_TRANSACTION);
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `message` embeds `digest`.
#[must_use]
pub fn message_embeds_digest(message: &str, digest: &str) -> bool {
    message.contains(digest)
}
