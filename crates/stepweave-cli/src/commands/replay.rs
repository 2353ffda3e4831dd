//! `stepweave replay` — Re-run a recorded session against a fresh store.

use serde_json::json;

use stepweave_core::replay::{replay, verify_replay, Recording};
use stepweave_core::state::EngineState;

use super::{print_json, to_json};

pub async fn run(state: &EngineState, file: &str, verify: bool) -> Result<(), String> {
    let recording = Recording::from_file(file).map_err(|e| e.to_string())?;
    let first = replay(
        state.schema.clone(),
        state.catalog.clone(),
        state.registry.clone(),
        state.config.clone(),
        &recording,
    )
    .await
    .map_err(|e| e.to_string())?;

    if verify {
        let second = replay(
            state.schema.clone(),
            state.catalog.clone(),
            state.registry.clone(),
            state.config.clone(),
            &recording,
        )
        .await
        .map_err(|e| e.to_string())?;
        verify_replay(&first, &second).map_err(|e| format!("Replay is not deterministic: {}", e))?;
    }

    let targets: Vec<&str> = first.resolutions.iter().map(|r| r.target.as_str()).collect();
    print_json(&json!({
        "workflow": recording.workflow,
        "outcome": first.outcome,
        "inputsConsumed": first.inputs_consumed,
        "inputsRecorded": recording.inputs.len(),
        "resolutions": targets,
        "verified": verify,
        "state": to_json(&first.state)?,
    }));
    Ok(())
}
