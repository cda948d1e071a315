use std::path::Path;

use accountkit_core::AccountId;
use clap::{ArgGroup, Subcommand};
use eyre::eyre;
use tracing::info;
use uuid::Uuid;

use super::parse_credential;
use crate::state;

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Create an account with one credential.
    Create {
        /// Account id. Defaults to a random UUID.
        #[arg(long)]
        id: Option<String>,
        /// Initial credential as JSON.
        #[arg(long, value_name = "JSON")]
        credential: String,
    },
    /// Show an account by id or by credential.
    #[command(group(ArgGroup::new("lookup").required(true).args(["id", "credential"])))]
    Show {
        /// Account id.
        #[arg(long)]
        id: Option<String>,
        /// Any credential bound to the account, as JSON.
        #[arg(long, value_name = "JSON")]
        credential: Option<String>,
    },
    /// Delete an account and release its credentials.
    Delete {
        /// Account id.
        #[arg(long)]
        id: String,
    },
}

pub fn run(state_path: &Path, command: AccountCommand) -> eyre::Result<()> {
    let mut store = state::load(state_path)?;

    match command {
        AccountCommand::Create { id, credential } => {
            let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
            let credential = parse_credential(&credential)?;
            let account_id = store.create_account(AccountId::new(id), credential)?;
            state::save(state_path, &store.snapshot())?;
            info!(%account_id, "account created");
            println!("{account_id}");
        }
        AccountCommand::Show { id, credential } => {
            let account = match (id, credential) {
                (Some(id), _) => store.resolve_by_id(&AccountId::new(id)),
                (None, Some(credential)) => {
                    store.resolve_by_credential(&parse_credential(&credential)?)
                }
                (None, None) => None,
            }
            .ok_or_else(|| eyre!("account not found"))?;
            println!("{}", serde_json::to_string_pretty(account)?);
        }
        AccountCommand::Delete { id } => {
            let account = store.delete_account(&AccountId::new(id))?;
            state::save(state_path, &store.snapshot())?;
            info!(account_id = %account.id, "account deleted");
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
    }
    Ok(())
}
