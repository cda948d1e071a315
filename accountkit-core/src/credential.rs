//! Credential model.
//!
//! A [`Credential`] is one of the identities that may control an abstract
//! account. Credentials are immutable values compared structurally: two
//! credentials are equal when their variant and every field are equal.
//!
//! Each credential has a stable string serialization,
//! [`Credential::canonical_string`], used as the reverse-index key and as
//! the base of the derivation path handed to the remote signer. Because
//! other chains compute addresses from that string, its format must never
//! change.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AccountKitError, Result};

/// Separator between the tag and fields of a canonical string.
const FIELD_SEPARATOR: char = ',';

/// Escape prefix for separator and escape characters inside fields.
const ESCAPE: char = '\\';

/// Maximum length of a ledger account id.
const MAX_LEDGER_ACCOUNT_LEN: usize = 64;

/// Minimum length of a ledger account id.
const MIN_LEDGER_ACCOUNT_LEN: usize = 2;

/// An authorization identity that can act as owner of an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    /// Raw public key authentication.
    PublicKey(String),
    /// A passkey registered through `WebAuthn`.
    #[serde(rename = "webauthn")]
    WebAuthn {
        /// Credential id assigned by the authenticator.
        key_id: String,
        /// Encoded public key of the passkey.
        public_key: String,
    },
    /// A federated identity token (`OpenID` Connect).
    ///
    /// Scoping by issuer and client id prevents one relying party from
    /// reusing another application's grant for the same email.
    FederatedIdentity {
        /// Token issuer.
        issuer: String,
        /// Audience the token was issued for.
        client_id: String,
        /// Email claim of the subject.
        subject_email: String,
    },
    /// Another ledger account.
    LedgerAccount(String),
}

/// Discriminant of a [`Credential`], used to route verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum CredentialKind {
    /// [`Credential::PublicKey`].
    PublicKey,
    /// [`Credential::WebAuthn`].
    #[strum(serialize = "webauthn")]
    WebAuthn,
    /// [`Credential::FederatedIdentity`].
    FederatedIdentity,
    /// [`Credential::LedgerAccount`].
    LedgerAccount,
}

impl CredentialKind {
    /// Tag used as the first component of the canonical string.
    #[must_use]
    pub const fn canonical_tag(self) -> &'static str {
        match self {
            Self::PublicKey => "pk",
            Self::WebAuthn => "webauthn",
            Self::FederatedIdentity => "oidc",
            Self::LedgerAccount => "account",
        }
    }
}

impl Credential {
    /// Returns the variant of this credential.
    #[must_use]
    pub const fn kind(&self) -> CredentialKind {
        match self {
            Self::PublicKey(_) => CredentialKind::PublicKey,
            Self::WebAuthn { .. } => CredentialKind::WebAuthn,
            Self::FederatedIdentity { .. } => CredentialKind::FederatedIdentity,
            Self::LedgerAccount(_) => CredentialKind::LedgerAccount,
        }
    }

    /// Checks the structural rules of the variant.
    ///
    /// # Errors
    ///
    /// Returns [`AccountKitError::InvalidCredential`] when a field is empty
    /// or malformed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::PublicKey(key) => {
                require_non_empty("public key", key)?;
                if key.trim() != key {
                    return Err(invalid("public key has surrounding whitespace"));
                }
                Ok(())
            }
            Self::WebAuthn { key_id, public_key } => {
                require_non_empty("webauthn key id", key_id)?;
                require_non_empty("webauthn public key", public_key)
            }
            Self::FederatedIdentity {
                issuer,
                client_id,
                subject_email,
            } => {
                require_non_empty("issuer", issuer)?;
                require_non_empty("client id", client_id)?;
                require_non_empty("subject email", subject_email)?;
                validate_email(subject_email)
            }
            Self::LedgerAccount(account_id) => validate_ledger_account(account_id),
        }
    }

    /// Returns the stable serialization `<tag>,<field>,...`.
    ///
    /// Separator and escape characters inside fields are backslash-escaped
    /// so distinct credentials never share a canonical string.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        let fields: Vec<&str> = match self {
            Self::PublicKey(key) => vec![key.as_str()],
            Self::WebAuthn { key_id, public_key } => vec![key_id.as_str(), public_key.as_str()],
            Self::FederatedIdentity {
                issuer,
                client_id,
                subject_email,
            } => vec![issuer.as_str(), client_id.as_str(), subject_email.as_str()],
            Self::LedgerAccount(account_id) => vec![account_id.as_str()],
        };

        let mut out = String::from(self.kind().canonical_tag());
        for field in fields {
            out.push(FIELD_SEPARATOR);
            escape_into(&mut out, field);
        }
        out
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

fn escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        if c == FIELD_SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn invalid(reason: impl Into<String>) -> AccountKitError {
    AccountKitError::InvalidCredential {
        reason: reason.into(),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(invalid(format!("malformed subject email: {email}"))),
    }
}

fn validate_ledger_account(account_id: &str) -> Result<()> {
    let len = account_id.len();
    if !(MIN_LEDGER_ACCOUNT_LEN..=MAX_LEDGER_ACCOUNT_LEN).contains(&len) {
        return Err(invalid(format!(
            "ledger account id must be {MIN_LEDGER_ACCOUNT_LEN}-{MAX_LEDGER_ACCOUNT_LEN} characters"
        )));
    }
    let allowed = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
    };
    if !account_id.chars().all(allowed) {
        return Err(invalid(format!(
            "ledger account id contains invalid characters: {account_id}"
        )));
    }
    Ok(())
}
