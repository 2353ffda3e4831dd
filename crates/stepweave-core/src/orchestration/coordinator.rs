use std::sync::Arc;

use tokio::sync::oneshot;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::session::{TurnRecord, UserInput};
use crate::models::state::WorkflowState;
use crate::models::step::NextStep;
use crate::orchestration::{CancelSignal, HandBack, InputSource, StepContext, WorkerRegistry, WorkerUnit};
use crate::resolver::StepResolver;
use crate::store::StateStore;
use crate::validation::Validator;
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

/// Where the control loop currently is for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorPhase {
    AwaitingResolution,
    Dispatched {
        resolution: NextStep,
        input: Option<UserInput>,
    },
}

#[derive(Debug)]
pub enum SessionOutcome {
    /// The resolver returned the terminal marker and final validation passed
    Completed {
        state: WorkflowState,
        resolution: NextStep,
    },
    /// The next unit needs input and none is available
    Suspended {
        state: WorkflowState,
        next: NextStep,
        prompt: String,
    },
    /// A fatal error stopped the loop; `state` is the last committed document
    Halted {
        error: EngineError,
        state: WorkflowState,
    },
}

#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub outcome: SessionOutcome,
    pub turns: Vec<TurnRecord>,
    /// Every resolution made during the run, in order
    pub resolutions: Vec<NextStep>,
}

impl SessionReport {
    pub fn state(&self) -> &WorkflowState {
        match &self.outcome {
            SessionOutcome::Completed { state, .. }
            | SessionOutcome::Suspended { state, .. }
            | SessionOutcome::Halted { state, .. } => state,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, SessionOutcome::Completed { .. })
    }

    pub fn inputs(&self) -> Vec<UserInput> {
        self.turns.iter().filter_map(|t| t.input.clone()).collect()
    }
}

/// Sequential control loop over one session at a time.
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    schema: Arc<WorkflowSchema>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<WorkerRegistry>,
    config: EngineConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        schema: Arc<WorkflowSchema>,
        catalog: Arc<dyn Catalog>,
        registry: Arc<WorkerRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            schema,
            catalog,
            registry,
            config,
        }
    }

    /// Resolve the next step of a stored session without dispatching.
    pub async fn resolve(&self, session_id: &str) -> Result<NextStep, EngineError> {
        let (state, _) = self.store.read(session_id).await?;
        self.resolve_state(&state)
    }

    pub fn resolve_state(&self, state: &WorkflowState) -> Result<NextStep, EngineError> {
        let validator = Validator::new(&self.schema, self.catalog.as_ref());
        StepResolver::new(&self.schema, validator).resolve(state)
    }

    /// Drive a session until it completes, runs out of input, or halts.
    ///
    /// Only a missing session is returned as `Err`; every other failure is
    /// reported as [`SessionOutcome::Halted`].
    pub async fn run(
        &self,
        session_id: &str,
        input: &mut dyn InputSource,
        cancel: &CancelSignal,
    ) -> Result<SessionReport, EngineError> {
        let (mut state, _) = self.store.read(session_id).await?;
        let mut turns: Vec<TurnRecord> = Vec::new();
        let mut resolutions: Vec<NextStep> = Vec::new();

        let mut phase = CoordinatorPhase::AwaitingResolution;
        let mut reprompt: Option<(String, String)> = None;
        let mut iterations: u32 = 0;

        let outcome = loop {
            if cancel.is_cancelled() {
                tracing::info!("[Coordinator] Session {} cancelled between turns", session_id);
                break SessionOutcome::Halted {
                    error: EngineError::Cancelled,
                    state,
                };
            }

            phase = match phase {
                CoordinatorPhase::AwaitingResolution => {
                    let next = match self.resolve_state(&state) {
                        Ok(next) => next,
                        Err(error) => break self.halt(session_id, error, state),
                    };
                    resolutions.push(next.clone());
                    tracing::debug!(
                        "[Coordinator] Session {} resolved to '{}' ({})",
                        session_id,
                        next.target,
                        next.reason
                    );

                    if next.terminal {
                        tracing::info!("[Coordinator] Session {} complete", session_id);
                        break SessionOutcome::Completed {
                            state,
                            resolution: next,
                        };
                    }

                    iterations += 1;
                    if iterations > self.config.max_iterations {
                        let error = EngineError::Protocol(format!(
                            "session exceeded {} iterations without completing",
                            self.config.max_iterations
                        ));
                        break self.halt(session_id, error, state);
                    }

                    let unit = match self.registry.get(&next.target) {
                        Ok(unit) => unit,
                        Err(error) => break self.halt(session_id, error, state),
                    };

                    let user_input = if unit.needs_input() {
                        let prompt = match reprompt.take() {
                            Some((step, prompt)) if step == next.target => prompt,
                            _ => unit.prompt(&self.schema, &state),
                        };
                        match input.next_input(&next, &prompt).await {
                            Some(answer) => Some(answer),
                            None => {
                                tracing::info!(
                                    "[Coordinator] Session {} suspended awaiting input for '{}'",
                                    session_id,
                                    next.target
                                );
                                break SessionOutcome::Suspended { state, next, prompt };
                            }
                        }
                    } else {
                        None
                    };

                    CoordinatorPhase::Dispatched {
                        resolution: next,
                        input: user_input,
                    }
                }

                CoordinatorPhase::Dispatched { resolution, input: user_input } => {
                    let unit = match self.registry.get(&resolution.target) {
                        Ok(unit) => unit,
                        Err(error) => break self.halt(session_id, error, state),
                    };
                    let hand_back = self
                        .dispatch(session_id, &resolution, unit, state.clone(), user_input.clone(), cancel)
                        .await;

                    // Re-read even on failure so a halt reports the last commit.
                    let reread = self.store.read(session_id).await;
                    let hand_back = match (hand_back, reread) {
                        (Ok(hand_back), Ok((fresh, _))) => {
                            state = fresh;
                            hand_back
                        }
                        (Err(error), Ok((fresh, _))) => break self.halt(session_id, error, fresh),
                        (_, Err(error)) => break self.halt(session_id, error, state),
                    };

                    reprompt = hand_back.reprompt().map(|p| (resolution.target.clone(), p));
                    turns.push(TurnRecord {
                        seq: turns.len() as u32 + 1,
                        step_id: resolution.target.clone(),
                        input: user_input,
                        resolution,
                        hand_back,
                        version_after: state.version,
                    });
                    CoordinatorPhase::AwaitingResolution
                }
            };
        };

        Ok(SessionReport {
            session_id: session_id.to_string(),
            outcome,
            turns,
            resolutions,
        })
    }

    async fn dispatch(
        &self,
        session_id: &str,
        resolution: &NextStep,
        unit: Arc<dyn WorkerUnit>,
        state: WorkflowState,
        input: Option<UserInput>,
        cancel: &CancelSignal,
    ) -> Result<HandBack, EngineError> {
        let (tx, rx) = oneshot::channel();
        let mut ctx = StepContext::new(
            session_id,
            resolution.clone(),
            self.store.clone(),
            self.schema.clone(),
            self.catalog.clone(),
            self.config.max_conflict_retries,
            state,
            tx,
        );
        tracing::debug!("[Coordinator] Dispatching '{}' for session {}", resolution.target, session_id);

        let result = {
            let run = unit.run(&mut ctx, input);
            let limit = self.config.turn_timeout();
            let guarded = async move {
                match limit {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout {
                            unit: resolution.target.clone(),
                            elapsed: limit,
                        }),
                    },
                    None => run.await,
                }
            };
            tokio::select! {
                result = guarded => result,
                _ = cancel.cancelled() => Err(EngineError::Cancelled),
            }
        };
        let handed_back = ctx.has_handed_back();
        let reprompt = unit.prompt(&self.schema, ctx.state());
        drop(ctx);

        match result {
            Ok(()) => {
                let hand_back = rx.await.map_err(|_| {
                    EngineError::Protocol(format!(
                        "worker unit '{}' returned without handing back",
                        resolution.target
                    ))
                })?;
                // Re-dispatching a unit that takes no input would repeat the same turn.
                if !unit.needs_input() && matches!(hand_back, HandBack::NeedsInput { .. }) {
                    return Err(EngineError::Protocol(format!(
                        "worker unit '{}' asked for input it cannot receive",
                        resolution.target
                    )));
                }
                Ok(hand_back)
            }
            Err(EngineError::Validation(errors)) if !handed_back && unit.needs_input() => {
                Ok(HandBack::needs_input(reprompt, errors))
            }
            Err(EngineError::Validation(errors)) if !handed_back => {
                Err(EngineError::Protocol(format!(
                    "worker unit '{}' cannot complete its step: {}",
                    resolution.target,
                    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
                )))
            }
            Err(error) => {
                tracing::error!(
                    "[Coordinator] Worker unit '{}' failed on session {}: {}",
                    resolution.target,
                    session_id,
                    error
                );
                Err(error)
            }
        }
    }

    fn halt(&self, session_id: &str, error: EngineError, state: WorkflowState) -> SessionOutcome {
        tracing::error!("[Coordinator] Session {} halted: {}", session_id, error);
        SessionOutcome::Halted { error, state }
    }
}
