//! Shared engine state for the CLI and embedders.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::EngineError;
use crate::orchestration::{CancelSignal, Coordinator, InputSource, SessionReport, WorkerRegistry};
use crate::store::{SqliteStateStore, StateStore, TurnStore};
use crate::workflow::builtin::{wizard_catalog, wizard_registry, wizard_schema};
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

/// Everything needed to drive sessions of one workflow against one database.
pub struct EngineStateInner {
    pub db: Database,
    pub schema: Arc<WorkflowSchema>,
    pub catalog: Arc<dyn Catalog>,
    pub store: Arc<dyn StateStore>,
    pub turn_store: TurnStore,
    pub registry: Arc<WorkerRegistry>,
    pub config: EngineConfig,
    pub coordinator: Coordinator,
}

pub type EngineState = Arc<EngineStateInner>;

impl EngineStateInner {
    pub fn new(
        db: Database,
        schema: Arc<WorkflowSchema>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<WorkerRegistry>,
        config: EngineConfig,
    ) -> Self {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::new(
            db.clone(),
            schema.clone(),
            catalog.clone(),
        ));
        let coordinator = Coordinator::new(
            store.clone(),
            schema.clone(),
            catalog.clone(),
            registry.clone(),
            config.clone(),
        );
        Self {
            turn_store: TurnStore::new(db.clone()),
            db,
            schema,
            catalog,
            store,
            registry,
            config,
            coordinator,
        }
    }

    /// The bundled wizard workflow with its catalog and units.
    pub fn wizard(db: Database, config: EngineConfig) -> Result<Self, EngineError> {
        let schema = Arc::new(wizard_schema()?);
        let catalog: Arc<dyn Catalog> = Arc::new(wizard_catalog()?);
        let registry = Arc::new(wizard_registry(&schema)?);
        Ok(Self::new(db, schema, catalog, registry, config))
    }

    /// Run the coordinator and append the turns it took to the session's
    /// history.
    pub async fn run_session(
        &self,
        session_id: &str,
        input: &mut dyn InputSource,
        cancel: &CancelSignal,
    ) -> Result<SessionReport, EngineError> {
        let mut report = self.coordinator.run(session_id, input, cancel).await?;
        if !report.turns.is_empty() {
            let seqs = self.turn_store.append(session_id, &report.turns).await?;
            for (turn, seq) in report.turns.iter_mut().zip(seqs) {
                turn.seq = seq;
            }
        }
        Ok(report)
    }
}
