//! Coordinator loop and the worker-unit contract.
//!
//! The coordinator alternates between two phases for one session:
//!   1. AWAITING_RESOLUTION: read the stored state and resolve the next step
//!   2. DISPATCHED: run the named worker unit until it hands back
//!
//! A worker unit writes only through its [`StepContext`] and ends every turn
//! with an explicit [`HandBack`] over a oneshot channel. Returning without a
//! hand-back, or exceeding the iteration cap, halts the session with a
//! protocol error; the stored document stays at its last committed write.

pub mod context;
pub mod coordinator;
pub mod registry;
pub mod signal;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use context::StepContext;
pub use coordinator::{Coordinator, CoordinatorPhase, SessionOutcome, SessionReport};
pub use registry::{WorkerRegistry, WorkerRegistryBuilder, WorkerUnit};
pub use signal::{CancelHandle, CancelSignal, InputSource, ScriptedInput};

/// Explicit end-of-turn signal from a worker unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandBack {
    /// The unit finished its work for this turn
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The input could not be used; re-prompt for the same step
    NeedsInput {
        prompt: String,
        #[serde(default)]
        errors: Vec<ValidationError>,
    },
    /// Control returned without finishing the step (mode change, partial data)
    Yielded { message: String },
}

impl HandBack {
    pub fn completed() -> Self {
        HandBack::Completed { message: None }
    }

    pub fn needs_input(prompt: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        HandBack::NeedsInput {
            prompt: prompt.into(),
            errors,
        }
    }

    pub fn yielded(message: impl Into<String>) -> Self {
        HandBack::Yielded {
            message: message.into(),
        }
    }

    /// Prompt to show before the next input, if the unit asked for one.
    pub fn reprompt(&self) -> Option<String> {
        match self {
            HandBack::NeedsInput { prompt, errors } if errors.is_empty() => Some(prompt.clone()),
            HandBack::NeedsInput { prompt, errors } => {
                let details = errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n");
                Some(format!("{}\n{}", details, prompt))
            }
            HandBack::Yielded { .. } | HandBack::Completed { .. } => None,
        }
    }
}
