use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::step::StepDefinition;

/// Opaque, step-owned data bundle.
pub type StepBundle = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowMode {
    #[default]
    Forward,
    Review,
    Edit,
}

impl WorkflowMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "FORWARD",
            Self::Review => "REVIEW",
            Self::Edit => "EDIT",
        }
    }
}

/// The single source of truth for one session.
///
/// Serialized layout:
/// `{fields, completedSteps, skippedSteps, mode, editTarget, version}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    #[serde(default)]
    pub fields: BTreeMap<String, StepBundle>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub skipped_steps: Vec<String>,
    #[serde(default)]
    pub mode: WorkflowMode,
    #[serde(default)]
    pub edit_target: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundle(&self, step: &str) -> Option<&StepBundle> {
        self.fields.get(step)
    }

    pub fn field(&self, step: &str, field: &str) -> Option<&serde_json::Value> {
        self.fields.get(step).and_then(|b| b.get(field))
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step)
    }

    pub fn is_skipped(&self, step: &str) -> bool {
        self.skipped_steps.iter().any(|s| s == step)
    }

    /// Completed, or skippable and skipped.
    pub fn is_satisfied(&self, step: &StepDefinition) -> bool {
        self.is_completed(&step.id) || (step.skippable && self.is_skipped(&step.id))
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_layout() {
        let mut state = WorkflowState::new();
        let mut bundle = StepBundle::new();
        bundle.insert("race".into(), serde_json::json!("Elf"));
        state.fields.insert("race".into(), bundle);
        state.completed_steps.push("race".into());
        state.mode = WorkflowMode::Edit;
        state.edit_target = Some("race".into());
        state.version = 2;

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["fields"]["race"]["race"], "Elf");
        assert_eq!(value["completedSteps"][0], "race");
        assert_eq!(value["mode"], "EDIT");
        assert_eq!(value["editTarget"], "race");
        assert_eq!(value["version"], 2);
    }

    #[test]
    fn test_parse_minimal_document() {
        let state = WorkflowState::from_json(r#"{"fields":{},"completedSteps":[],"mode":"FORWARD","editTarget":null,"version":0}"#)
            .unwrap();
        assert_eq!(state, WorkflowState::new());
        let mode: WorkflowMode = serde_json::from_str(r#""REVIEW""#).unwrap();
        assert_eq!(mode, WorkflowMode::Review);
    }

    #[test]
    fn test_skipped_counts_only_for_skippable_steps() {
        let mut state = WorkflowState::new();
        state.skipped_steps.push("portrait".into());
        let mut step: StepDefinition =
            serde_yaml::from_str("id: portrait\nfields: [{ name: note, kind: { type: text } }]\n").unwrap();
        assert!(!state.is_satisfied(&step));
        step.skippable = true;
        assert!(state.is_satisfied(&step));
        state.skipped_steps.clear();
        state.completed_steps.push("portrait".into());
        step.skippable = false;
        assert!(state.is_satisfied(&step));
    }
}
