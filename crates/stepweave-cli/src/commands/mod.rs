//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the stepweave-core engine through `EngineState`.

pub mod replay;
pub mod session;
pub mod workflow;

use std::sync::Arc;

use stepweave_core::config::EngineConfig;
use stepweave_core::orchestration::WorkerRegistry;
use stepweave_core::state::{EngineState, EngineStateInner};
use stepweave_core::workflow::{Catalog, WorkflowDefinition, WorkflowSchema};
use stepweave_core::{Database, EngineError};

/// Initialize a shared `EngineState` from the given SQLite database path.
///
/// Without `workflow_path` the built-in wizard workflow is used; a custom
/// workflow gets a form unit per step and its inline catalog.
pub fn init_state(db_path: &str, config_path: Option<&str>, workflow_path: Option<&str>) -> EngineState {
    match build_state(db_path, config_path, workflow_path) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Failed to initialize engine: {}", e);
            std::process::exit(1);
        }
    }
}

pub fn build_state(
    db_path: &str,
    config_path: Option<&str>,
    workflow_path: Option<&str>,
) -> Result<EngineState, EngineError> {
    let db = if db_path == ":memory:" {
        Database::open_in_memory()?
    } else {
        Database::open(db_path)?
    };
    let config = match config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let inner = match workflow_path {
        Some(path) => {
            let definition = WorkflowDefinition::from_file(path)?;
            let schema = Arc::new(WorkflowSchema::compile(&definition)?);
            let catalog: Arc<dyn Catalog> = Arc::new(definition.inline_catalog());
            let registry = Arc::new(WorkerRegistry::with_form_units(&schema)?);
            tracing::info!("Loaded workflow '{}' from {}", schema.name(), path);
            EngineStateInner::new(db, schema, catalog, registry, config)
        }
        None => EngineStateInner::wizard(db, config)?,
    };
    Ok(Arc::new(inner))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to serialize output: {}", e))
}
