//! Local state file.
//!
//! The file holds an [`AccountStoreSnapshot`] as pretty-printed JSON. Writes
//! go to a sibling temporary file that is renamed over the target, so a
//! crash never leaves a truncated state file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use accountkit_core::{AccountStore, AccountStoreSnapshot, ExecutionConfig};
use eyre::{eyre, WrapErr as _};

const STATE_FILE_NAME: &str = "state.json";

/// `<data dir>/accountkit/state.json`.
pub fn default_state_path() -> eyre::Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| eyre!("no data directory on this platform"))?;
    Ok(data_dir.join("accountkit").join(STATE_FILE_NAME))
}

pub fn load(path: &Path) -> eyre::Result<AccountStore> {
    let raw = fs::read_to_string(path).wrap_err_with(|| {
        format!(
            "failed to read state file {} (run `accountkit init` first)",
            path.display()
        )
    })?;
    let snapshot: AccountStoreSnapshot = serde_json::from_str(&raw)
        .wrap_err_with(|| format!("malformed state file {}", path.display()))?;
    Ok(AccountStore::from_snapshot(snapshot)?)
}

pub fn save(path: &Path, snapshot: &AccountStoreSnapshot) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    let mut encoded = serde_json::to_string_pretty(snapshot)?;
    encoded.push('\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, encoded).wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).wrap_err_with(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn load_config(path: Option<&Path>) -> eyre::Result<ExecutionConfig> {
    let Some(path) = path else {
        return Ok(ExecutionConfig::default());
    };
    let raw = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    Ok(ExecutionConfig::from_json_str(&raw)?)
}
