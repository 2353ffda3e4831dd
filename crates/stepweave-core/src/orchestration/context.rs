use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::EngineError;
use crate::models::state::WorkflowState;
use crate::models::step::{NextStep, StepDefinition};
use crate::orchestration::HandBack;
use crate::store::{Mutation, StateStore};
use crate::validation::Validator;
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

/// Everything a worker unit may touch during one dispatched turn.
///
/// Writes are restricted to the dispatched step (mode changes excepted) and
/// are refused once the unit has handed back.
pub struct StepContext {
    session_id: String,
    unit_id: String,
    store: Arc<dyn StateStore>,
    schema: Arc<WorkflowSchema>,
    catalog: Arc<dyn Catalog>,
    max_conflict_retries: u32,
    state: WorkflowState,
    version: u64,
    hand_back: Option<oneshot::Sender<HandBack>>,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        resolution: NextStep,
        store: Arc<dyn StateStore>,
        schema: Arc<WorkflowSchema>,
        catalog: Arc<dyn Catalog>,
        max_conflict_retries: u32,
        state: WorkflowState,
        hand_back: oneshot::Sender<HandBack>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            unit_id: resolution.target,
            store,
            schema,
            catalog,
            max_conflict_retries,
            version: state.version,
            state,
            hand_back: Some(hand_back),
        }
    }

    /// Snapshot as of the last read or successful write.
    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn schema(&self) -> &WorkflowSchema {
        &self.schema
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn validator(&self) -> Validator<'_> {
        Validator::new(&self.schema, self.catalog.as_ref())
    }

    /// Definition of the dispatched step; `None` for the review unit.
    pub fn step(&self) -> Option<&StepDefinition> {
        self.schema.step(&self.unit_id)
    }

    pub fn has_handed_back(&self) -> bool {
        self.hand_back.is_none()
    }

    /// Re-read the stored document.
    pub async fn refresh(&mut self) -> Result<(), EngineError> {
        let (state, version) = self.store.read(&self.session_id).await?;
        self.state = state;
        self.version = version;
        Ok(())
    }

    /// Build mutations from the current snapshot and write them. On a
    /// version conflict the snapshot is re-read and `build` is called again,
    /// up to the configured retry bound.
    pub async fn commit<F>(&mut self, mut build: F) -> Result<u64, EngineError>
    where
        F: FnMut(&WorkflowState) -> Vec<Mutation> + Send,
    {
        if self.has_handed_back() {
            return Err(EngineError::Protocol(format!(
                "worker unit '{}' wrote after handing back",
                self.unit_id
            )));
        }

        let mut attempts = 0;
        loop {
            let mutations = build(&self.state);
            self.check_ownership(&mutations)?;

            match self.store.write(&self.session_id, self.version, &mutations).await {
                Ok(version) => {
                    self.refresh().await?;
                    return Ok(version);
                }
                Err(EngineError::Conflict { expected, actual, .. }) => {
                    attempts += 1;
                    tracing::warn!(
                        "[StepContext] Conflict on session {} for unit {} (expected {}, found {}), attempt {}",
                        self.session_id,
                        self.unit_id,
                        expected,
                        actual,
                        attempts
                    );
                    if attempts > self.max_conflict_retries {
                        return Err(EngineError::Protocol(format!(
                            "worker unit '{}' gave up after {} conflicting writes",
                            self.unit_id, attempts
                        )));
                    }
                    self.refresh().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write a fixed set of mutations, retrying on conflict.
    pub async fn write(&mut self, mutations: Vec<Mutation>) -> Result<u64, EngineError> {
        self.commit(move |_| mutations.clone()).await
    }

    /// End the turn. A second hand-back is a protocol violation.
    pub fn hand_back(&mut self, outcome: HandBack) -> Result<(), EngineError> {
        let tx = self.hand_back.take().ok_or_else(|| {
            EngineError::Protocol(format!("worker unit '{}' handed back twice", self.unit_id))
        })?;
        // The receiver only disappears when the dispatch was abandoned.
        tx.send(outcome).map_err(|_| EngineError::Cancelled)
    }

    fn check_ownership(&self, mutations: &[Mutation]) -> Result<(), EngineError> {
        for mutation in mutations {
            if mutation.is_mode_control() {
                continue;
            }
            if let Some(step) = mutation.step() {
                if step != self.unit_id {
                    return Err(EngineError::Protocol(format!(
                        "worker unit '{}' attempted to modify step '{}'",
                        self.unit_id, step
                    )));
                }
            }
        }
        Ok(())
    }
}
