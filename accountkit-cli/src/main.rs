//! `accountkit` developer CLI.
//!
//! Drives the execution core against a local JSON state file:
//!
//! ```text
//! accountkit init
//! accountkit account create --credential '{"public_key":"pk1"}'
//! accountkit derive --credential '{"public_key":"pk1"}'
//! accountkit digest --transaction tx.json
//! accountkit execute --request request.json
//! ```

mod commands;
mod state;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "accountkit",
    version,
    about = "Manage abstract accounts and dry-run transactions locally",
    arg_required_else_help = true
)]
struct Cli {
    /// State file holding the account store.
    #[arg(long, global = true, env = "ACCOUNTKIT_STATE", value_name = "PATH")]
    state: Option<PathBuf>,

    /// Execution configuration (JSON).
    #[arg(long, global = true, env = "ACCOUNTKIT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty state file.
    Init {
        /// Overwrite an existing state file.
        #[arg(long)]
        force: bool,
    },
    /// Create, inspect or delete accounts.
    #[command(subcommand)]
    Account(commands::account::AccountCommand),
    /// Print the signer derivation path of a credential.
    Derive {
        /// Credential as JSON, e.g. `{"public_key":"pk1"}`.
        #[arg(long, value_name = "JSON")]
        credential: String,
    },
    /// Print the digest a signed message must embed for a transaction.
    Digest {
        /// Transaction JSON file.
        #[arg(long, value_name = "FILE")]
        transaction: PathBuf,
    },
    /// Execute a request with the in-memory validator and signer.
    Execute {
        /// Execution request JSON file.
        #[arg(long, value_name = "FILE")]
        request: PathBuf,
        /// Make the validator reject the signature.
        #[arg(long)]
        reject: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let state_path = match cli.state {
        Some(path) => path,
        None => state::default_state_path()?,
    };

    match cli.command {
        Command::Init { force } => commands::init(&state_path, force),
        Command::Account(command) => commands::account::run(&state_path, command),
        Command::Derive { credential } => commands::derive(&credential),
        Command::Digest { transaction } => commands::digest(&transaction),
        Command::Execute { request, reject } => {
            commands::execute::run(&state_path, cli.config.as_deref(), &request, reject).await
        }
    }
}
