//! Execution configuration.

use serde::{Deserialize, Serialize};

use crate::{error::Result, pending::PENDING_TTL_SECONDS};

/// Default cap on the number of actions in one transaction.
pub const DEFAULT_MAX_ACTIONS: usize = 32;

/// Tunables for the execution coordinator.
///
/// Missing fields take their defaults when deserialized, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Seconds a dispatched execution guards its account before it is
    /// treated as abandoned.
    pub pending_ttl_secs: u64,
    /// Transactions with more actions are rejected at dispatch.
    pub max_actions_per_transaction: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: PENDING_TTL_SECONDS,
            max_actions_per_transaction: DEFAULT_MAX_ACTIONS,
        }
    }
}

impl ExecutionConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AccountKitError::Serialization`] if the document is
    /// not valid JSON or contains unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
