//! Session replay for regression testing.
//!
//! A [`Recording`] is the ordered list of inputs a session consumed. Running
//! it against a fresh in-memory session must reproduce the same resolutions
//! and the same final document.
//!
//! ```yaml
//! workflow: wizard
//! inputs:
//!   - "name=Elara; race=Elf"
//!   - "strength=8; dexterity=14; ..."
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::session::UserInput;
use crate::models::state::WorkflowState;
use crate::models::step::NextStep;
use crate::orchestration::{CancelSignal, Coordinator, ScriptedInput, SessionOutcome, WorkerRegistry};
use crate::store::{MemoryStateStore, StateStore};
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

const REPLAY_SESSION: &str = "replay";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    pub workflow: String,
    #[serde(default)]
    pub inputs: Vec<UserInput>,
}

impl Recording {
    pub fn new(workflow: &str, inputs: Vec<UserInput>) -> Self {
        Self {
            workflow: workflow.to_string(),
            inputs,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a recording, choosing the format by extension (`.json` or YAML).
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::NotFound(format!("recording '{}': {}", path, e)))?;
        if path.ends_with(".json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn to_yaml(&self) -> Result<String, EngineError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// What a replay produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRun {
    pub resolutions: Vec<NextStep>,
    pub state: WorkflowState,
    pub inputs_consumed: usize,
    /// `completed`, `suspended` or `halted: <error>`
    pub outcome: String,
}

impl ReplayRun {
    pub fn is_complete(&self) -> bool {
        self.outcome == "completed"
    }
}

/// Run `recording` against a fresh in-memory session.
pub async fn replay(
    schema: Arc<WorkflowSchema>,
    catalog: Arc<dyn Catalog>,
    registry: Arc<WorkerRegistry>,
    config: EngineConfig,
    recording: &Recording,
) -> Result<ReplayRun, EngineError> {
    if recording.workflow != schema.name() {
        return Err(EngineError::InvalidWorkflow(format!(
            "recording is for workflow '{}', not '{}'",
            recording.workflow,
            schema.name()
        )));
    }

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new(schema.clone(), catalog.clone()));
    store.create_session(Some(REPLAY_SESSION)).await?;
    let coordinator = Coordinator::new(store, schema, catalog, registry, config);

    let mut input = ScriptedInput::new(recording.inputs.iter().cloned());
    let report = coordinator
        .run(REPLAY_SESSION, &mut input, &CancelSignal::never())
        .await?;

    let outcome = match &report.outcome {
        SessionOutcome::Completed { .. } => "completed".to_string(),
        SessionOutcome::Suspended { .. } => "suspended".to_string(),
        SessionOutcome::Halted { error, .. } => format!("halted: {}", error),
    };
    tracing::info!(
        "[Replay] {} input(s), {} resolution(s), outcome {}",
        input.consumed().len(),
        report.resolutions.len(),
        outcome
    );

    Ok(ReplayRun {
        state: report.state().clone(),
        resolutions: report.resolutions,
        inputs_consumed: input.consumed().len(),
        outcome,
    })
}

/// Compare two runs of the same recording; reports the first divergence.
pub fn verify_replay(expected: &ReplayRun, actual: &ReplayRun) -> Result<(), EngineError> {
    for (i, (a, b)) in expected.resolutions.iter().zip(&actual.resolutions).enumerate() {
        if a != b {
            return Err(EngineError::Protocol(format!(
                "resolution {} diverged: expected '{}', got '{}'",
                i + 1,
                a.target,
                b.target
            )));
        }
    }
    if expected.resolutions.len() != actual.resolutions.len() {
        return Err(EngineError::Protocol(format!(
            "expected {} resolutions, got {}",
            expected.resolutions.len(),
            actual.resolutions.len()
        )));
    }
    if expected.state != actual.state {
        return Err(EngineError::Protocol("final state diverged".into()));
    }
    if expected.outcome != actual.outcome {
        return Err(EngineError::Protocol(format!(
            "outcome diverged: expected {}, got {}",
            expected.outcome, actual.outcome
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::builtin::{wizard_catalog, wizard_registry, wizard_schema};

    pub(crate) const WIZARD_INPUTS: [&str; 8] = [
        "name=Elara; race=Elf",
        "strength=8; dexterity=14; constitution=13; intelligence=15; wisdom=12; charisma=10",
        "class_name=wizard; skills=Arcana, Investigation",
        "background=Sage; plus_two=intelligence; plus_one=constitution",
        "spells=Magic Missile, Shield, Mage Armor, Sleep, Detect Magic, Find Familiar",
        "spells=Fire Bolt, Mage Hand, Light",
        "spells=Magic Missile, Shield, Mage Armor, Sleep",
        "skip",
    ];

    async fn run(recording: &Recording) -> ReplayRun {
        let schema = Arc::new(wizard_schema().unwrap());
        let catalog: Arc<dyn Catalog> = Arc::new(wizard_catalog().unwrap());
        let registry = Arc::new(wizard_registry(&schema).unwrap());
        replay(schema, catalog, registry, EngineConfig::default(), recording)
            .await
            .unwrap()
    }

    fn recording() -> Recording {
        Recording::new(
            "wizard",
            WIZARD_INPUTS.iter().map(|s| UserInput::from(*s)).collect(),
        )
    }

    #[tokio::test]
    async fn test_replay_completes_wizard() {
        let run = run(&recording()).await;
        assert!(run.is_complete(), "{}", run.outcome);
        assert_eq!(run.inputs_consumed, WIZARD_INPUTS.len());

        let targets: Vec<&str> = run.resolutions.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(
            targets,
            vec![
                "race",
                "ability_scores",
                "class",
                "background",
                "spellcasting",
                "spellbook",
                "cantrips",
                "prepared_spells",
                "derived_stats",
                "portrait",
                "complete",
            ]
        );
        assert!(run.resolutions.iter().all(|r| r.also_ready.is_empty()));
        assert_eq!(
            run.state.field("background", "skills"),
            Some(&serde_json::json!(["Arcana", "History"]))
        );

        // INT 15 + 2 = 17 (+3), DEX 14 (+2), CON 13 + 1 = 14 (+2)
        assert_eq!(run.state.field("spellcasting", "save_dc"), Some(&serde_json::json!(13)));
        assert_eq!(run.state.field("spellcasting", "max_prepared"), Some(&serde_json::json!(4)));
        assert_eq!(run.state.field("derived_stats", "armor_class"), Some(&serde_json::json!(12)));
        assert_eq!(run.state.field("derived_stats", "hit_points"), Some(&serde_json::json!(8)));
        assert!(run.state.is_skipped("portrait"));
    }

    #[tokio::test]
    async fn test_replay_is_deterministic() {
        let first = run(&recording()).await;
        let second = run(&recording()).await;
        verify_replay(&first, &second).unwrap();
    }

    #[tokio::test]
    async fn test_truncated_recording_suspends_and_diverges() {
        let full = run(&recording()).await;
        let mut short = recording();
        short.inputs.truncate(3);
        let partial = run(&short).await;

        assert_eq!(partial.outcome, "suspended");
        assert_eq!(partial.state.completed_steps, vec!["race", "ability_scores", "class"]);
        assert!(verify_replay(&full, &partial).is_err());
    }

    #[tokio::test]
    async fn test_background_choices_are_checked_against_the_catalog() {
        let mut inputs: Vec<&str> = WIZARD_INPUTS[..3].to_vec();
        inputs.push("background=Sage; skills=Stealth, Athletics; plus_two=strength; plus_one=strength");
        let rejected = run(&Recording::new(
            "wizard",
            inputs.iter().map(|s| UserInput::from(*s)).collect(),
        ))
        .await;

        assert_eq!(rejected.outcome, "suspended");
        assert!(!rejected.state.is_completed("background"));
        assert_eq!(
            rejected.state.field("background", "skills"),
            Some(&serde_json::json!(["Arcana", "History"]))
        );
        let targets: Vec<&str> = rejected.resolutions.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(targets.last(), Some(&"background"));

        inputs.push("plus_two=intelligence; plus_one=constitution");
        let fixed = run(&Recording::new(
            "wizard",
            inputs.iter().map(|s| UserInput::from(*s)).collect(),
        ))
        .await;
        assert!(fixed.state.is_completed("background"));
        assert!(fixed.state.is_completed("spellcasting"));
        assert_eq!(fixed.state.field("spellcasting", "save_dc"), Some(&serde_json::json!(13)));
    }

    #[tokio::test]
    async fn test_edit_before_dependencies_reprompts() {
        let mut inputs = vec!["edit spellcasting"];
        inputs.extend(WIZARD_INPUTS);
        let run = run(&Recording::new(
            "wizard",
            inputs.iter().map(|s| UserInput::from(*s)).collect(),
        ))
        .await;

        assert!(run.is_complete(), "{}", run.outcome);
        assert_eq!(run.resolutions[0].target, "race");
        assert_eq!(run.resolutions[1].target, "race");
        assert!(run.state.edit_target.is_none());
    }

    #[tokio::test]
    async fn test_recording_for_other_workflow_is_rejected() {
        let schema = Arc::new(wizard_schema().unwrap());
        let catalog: Arc<dyn Catalog> = Arc::new(wizard_catalog().unwrap());
        let registry = Arc::new(wizard_registry(&schema).unwrap());
        let err = replay(
            schema,
            catalog,
            registry,
            EngineConfig::default(),
            &Recording::new("cleric", Vec::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidWorkflow(_)));
    }

    #[test]
    fn test_recording_yaml() {
        let recording = Recording::from_yaml("workflow: wizard\ninputs:\n  - \"race=Elf\"\n  - skip\n").unwrap();
        assert_eq!(recording.inputs, vec![UserInput::from("race=Elf"), UserInput::from("skip")]);
        let again = Recording::from_yaml(&recording.to_yaml().unwrap()).unwrap();
        assert_eq!(again, recording);
    }
}
