pub mod account;
pub mod execute;

use std::{fs, path::Path};

use accountkit_core::{
    derivation::transaction_digest, AccountStoreSnapshot, Credential, ExecutionCoordinator,
    Transaction,
};
use eyre::{bail, WrapErr as _};
use tracing::info;

use crate::state;

pub fn init(state_path: &Path, force: bool) -> eyre::Result<()> {
    if state_path.exists() && !force {
        bail!(
            "state file {} already exists (pass --force to overwrite)",
            state_path.display()
        );
    }
    state::save(state_path, &AccountStoreSnapshot::default())?;
    info!(path = %state_path.display(), "initialized state file");
    println!("{}", state_path.display());
    Ok(())
}

pub fn derive(credential: &str) -> eyre::Result<()> {
    let credential = parse_credential(credential)?;
    println!(
        "{}",
        ExecutionCoordinator::derive_key_from_credential(&credential)
    );
    Ok(())
}

pub fn digest(transaction_path: &Path) -> eyre::Result<()> {
    let transaction: Transaction = read_json(transaction_path)?;
    println!("{}", transaction_digest(&transaction)?);
    Ok(())
}

pub fn parse_credential(raw: &str) -> eyre::Result<Credential> {
    let credential: Credential = serde_json::from_str(raw).wrap_err_with(|| {
        format!("invalid credential JSON {raw:?} (expected e.g. {{\"public_key\":\"...\"}})")
    })?;
    credential.validate()?;
    Ok(credential)
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> eyre::Result<T> {
    let raw =
        fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).wrap_err_with(|| format!("malformed JSON in {}", path.display()))
}
