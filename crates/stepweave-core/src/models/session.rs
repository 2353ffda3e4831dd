use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::step::NextStep;
use crate::models::state::WorkflowMode;
use crate::orchestration::HandBack;

/// A raw user answer handed to a worker unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct UserInput(pub String);

impl UserInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for UserInput {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Listing entry for a stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub workflow: String,
    pub version: u64,
    pub mode: WorkflowMode,
    pub completed_steps: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One AWAITING_RESOLUTION → DISPATCHED → hand-back cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub seq: u32,
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<UserInput>,
    pub resolution: NextStep,
    pub hand_back: HandBack,
    pub version_after: u64,
}
