use std::{path::Path, sync::Arc};

use accountkit_core::{
    collaborators::memory::{RecordingSigner, StaticValidator},
    ExecutionCoordinator, ExecutionRequest, ValidatorRegistry,
};

use super::read_json;
use crate::state;

/// Runs `request` through both execution phases.
///
/// The state is saved even when execution fails, since a signer failure
/// leaves earlier actions applied.
pub async fn run(
    state_path: &Path,
    config_path: Option<&Path>,
    request_path: &Path,
    reject: bool,
) -> eyre::Result<()> {
    let store = state::load(state_path)?;
    let config = state::load_config(config_path)?;
    let request: ExecutionRequest = read_json(request_path)?;

    let validator = Arc::new(StaticValidator::new(!reject));
    let signer = Arc::new(RecordingSigner::new());
    let coordinator = ExecutionCoordinator::new(ValidatorRegistry::uniform(validator), signer)
        .with_store(store)
        .with_config(config);

    let result = coordinator.execute(request).await;
    state::save(state_path, &coordinator.snapshot())?;

    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}
