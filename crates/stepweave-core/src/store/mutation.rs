//! Validated write vocabulary for the state store.
//!
//! Every backend applies a write through [`apply_mutations`], so memory and
//! SQLite sessions obey the same rules: completeness is checked when a step
//! is marked complete, a bundle change that breaks a completed step removes
//! it from `completedSteps`, and derived steps downstream of a changed
//! bundle are reopened.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, ValidationError};
use crate::models::state::{StepBundle, WorkflowMode, WorkflowState};
use crate::validation::Validator;
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Merge `values` into the step's bundle
    SetFields { step: String, values: StepBundle },
    /// Remove fields from the bundle; an empty list clears the whole bundle
    ClearFields {
        step: String,
        #[serde(default)]
        fields: Vec<String>,
    },
    Complete { step: String },
    Skip { step: String },
    Reopen { step: String },
    EnterReview,
    /// Jump back to a step whose dependencies are satisfied
    EnterEdit { step: String },
    /// Leave EDIT mode without finishing the target
    ExitEdit,
    ExitReview,
}

impl Mutation {
    pub fn set(step: &str, values: StepBundle) -> Self {
        Mutation::SetFields {
            step: step.to_string(),
            values,
        }
    }

    pub fn complete(step: &str) -> Self {
        Mutation::Complete {
            step: step.to_string(),
        }
    }

    /// The step whose bundle or status this mutation touches, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Mutation::SetFields { step, .. }
            | Mutation::ClearFields { step, .. }
            | Mutation::Complete { step }
            | Mutation::Skip { step }
            | Mutation::Reopen { step } => Some(step),
            Mutation::EnterEdit { .. }
            | Mutation::ExitEdit
            | Mutation::EnterReview
            | Mutation::ExitReview => None,
        }
    }

    /// Mode changes may be issued by any unit.
    pub fn is_mode_control(&self) -> bool {
        matches!(
            self,
            Mutation::EnterReview
                | Mutation::EnterEdit { .. }
                | Mutation::ExitEdit
                | Mutation::ExitReview
        )
    }
}

/// Apply one write (a batch of mutations) to `state`.
///
/// Returns the new state with `version` advanced by exactly one. The input
/// state is never modified, so a rejected write leaves nothing behind.
pub fn apply_mutations(
    schema: &WorkflowSchema,
    catalog: &dyn Catalog,
    state: &WorkflowState,
    mutations: &[Mutation],
) -> Result<WorkflowState, EngineError> {
    if mutations.is_empty() {
        return Err(EngineError::Protocol("write carries no mutations".into()));
    }

    let validator = Validator::new(schema, catalog);
    let mut next = state.clone();
    let mut changed: BTreeSet<String> = BTreeSet::new();

    for mutation in mutations {
        if let Some(step) = mutation.step() {
            schema.require_step(step)?;
        }

        match mutation {
            Mutation::SetFields { step, values } => {
                let def = schema.require_step(step)?;
                let unknown: Vec<ValidationError> = values
                    .keys()
                    .filter(|k| def.field(k).is_none())
                    .map(|k| ValidationError::field(step, k, "unknown field"))
                    .collect();
                if !unknown.is_empty() {
                    return Err(EngineError::Validation(unknown));
                }
                if values.is_empty() {
                    continue;
                }
                let bundle = next.fields.entry(step.clone()).or_default();
                for (key, value) in values {
                    bundle.insert(key.clone(), value.clone());
                }
                changed.insert(step.clone());
            }
            Mutation::ClearFields { step, fields } => {
                if fields.is_empty() {
                    next.fields.remove(step);
                } else if let Some(bundle) = next.fields.get_mut(step) {
                    for field in fields {
                        bundle.remove(field);
                    }
                    if bundle.is_empty() {
                        next.fields.remove(step);
                    }
                }
                changed.insert(step.clone());
            }
            Mutation::Complete { step } => {
                if !validator.is_step_complete(&next, step) {
                    let def = schema.require_step(step)?;
                    let mut errors = next
                        .bundle(step)
                        .map(|b| validator.validate_bundle(def, b))
                        .unwrap_or_default();
                    if errors.is_empty() {
                        errors.push(ValidationError::step(step, "step has no data"));
                    }
                    return Err(EngineError::Validation(errors));
                }
                next.skipped_steps.retain(|s| s != step);
                if !next.is_completed(step) {
                    next.completed_steps.push(step.clone());
                }
                if next.mode == WorkflowMode::Edit && next.edit_target.as_deref() == Some(step) {
                    next.mode = WorkflowMode::Forward;
                    next.edit_target = None;
                }
            }
            Mutation::Skip { step } => {
                let def = schema.require_step(step)?;
                if !def.skippable {
                    return Err(EngineError::Protocol(format!("step '{}' cannot be skipped", step)));
                }
                if next.fields.remove(step).is_some() {
                    changed.insert(step.clone());
                }
                next.completed_steps.retain(|s| s != step);
                if !next.is_skipped(step) {
                    next.skipped_steps.push(step.clone());
                }
                if next.mode == WorkflowMode::Edit && next.edit_target.as_deref() == Some(step) {
                    next.mode = WorkflowMode::Forward;
                    next.edit_target = None;
                }
            }
            Mutation::Reopen { step } => {
                next.completed_steps.retain(|s| s != step);
                next.skipped_steps.retain(|s| s != step);
            }
            Mutation::EnterReview => {
                if schema.review_unit().is_none() {
                    return Err(EngineError::Protocol(format!(
                        "workflow '{}' has no review unit",
                        schema.name()
                    )));
                }
                next.mode = WorkflowMode::Review;
                next.edit_target = None;
            }
            Mutation::EnterEdit { step } => {
                let Some(def) = schema.step(step) else {
                    return Err(EngineError::NotFound(format!(
                        "step '{}' in workflow '{}'",
                        step,
                        schema.name()
                    )));
                };
                let pending: Vec<&str> = def
                    .depends_on
                    .iter()
                    .filter(|dep| !schema.step(dep).map(|d| next.is_satisfied(d)).unwrap_or(false))
                    .map(String::as_str)
                    .collect();
                if !pending.is_empty() {
                    return Err(EngineError::Validation(vec![ValidationError::step(
                        step,
                        format!("cannot edit yet; finish {} first", pending.join(", ")),
                    )]));
                }
                next.mode = WorkflowMode::Edit;
                next.edit_target = Some(step.clone());
            }
            Mutation::ExitEdit => {
                if next.mode != WorkflowMode::Edit {
                    return Err(EngineError::Protocol(format!(
                        "cannot leave edit while in {} mode",
                        next.mode.as_str()
                    )));
                }
                next.mode = WorkflowMode::Forward;
                next.edit_target = None;
            }
            Mutation::ExitReview => {
                if next.mode != WorkflowMode::Review {
                    return Err(EngineError::Protocol(format!(
                        "cannot leave review while in {} mode",
                        next.mode.as_str()
                    )));
                }
                next.mode = WorkflowMode::Forward;
            }
        }
    }

    for step in &changed {
        if next.is_completed(step) && !validator.is_step_complete(&next, step) {
            next.completed_steps.retain(|s| s != step);
        }
        for dependent in schema.dependents_of(step) {
            if dependent.derived && !changed.contains(&dependent.id) {
                next.completed_steps.retain(|s| s != &dependent.id);
            }
        }
    }

    next.version = state.version + 1;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::catalog::StaticCatalog;
    use serde_json::json;

    fn schema() -> WorkflowSchema {
        WorkflowSchema::from_yaml(
            r#"
name: "mutations"
review_unit: review
steps:
  - id: ability_scores
    fields:
      - name: intelligence
        kind: { type: integer, min: 3, max: 18 }
  - id: spellcasting
    depends_on: [ability_scores]
    derived: true
    fields:
      - name: save_dc
        kind: { type: integer }
  - id: portrait
    skippable: true
    fields:
      - name: description
        kind: { type: text }
"#,
        )
        .unwrap()
    }

    fn values(v: serde_json::Value) -> StepBundle {
        v.as_object().cloned().unwrap()
    }

    fn apply(state: &WorkflowState, mutations: &[Mutation]) -> Result<WorkflowState, EngineError> {
        apply_mutations(&schema(), &StaticCatalog::new(), state, mutations)
    }

    #[test]
    fn test_complete_requires_valid_bundle() {
        let state = WorkflowState::new();
        let err = apply(&state, &[Mutation::complete("ability_scores")]).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let state = apply(
            &state,
            &[
                Mutation::set("ability_scores", values(json!({"intelligence": 25}))),
            ],
        )
        .unwrap();
        assert_eq!(state.version, 1);
        let err = apply(&state, &[Mutation::complete("ability_scores")]).unwrap_err();
        assert!(err.to_string().contains("ability_scores.intelligence"));

        let state = apply(
            &state,
            &[
                Mutation::set("ability_scores", values(json!({"intelligence": 16}))),
                Mutation::complete("ability_scores"),
            ],
        )
        .unwrap();
        assert_eq!(state.version, 2);
        assert!(state.is_completed("ability_scores"));
    }

    #[test]
    fn test_changing_a_dependency_reopens_derived_steps() {
        let state = apply(
            &WorkflowState::new(),
            &[
                Mutation::set("ability_scores", values(json!({"intelligence": 16}))),
                Mutation::complete("ability_scores"),
                Mutation::set("spellcasting", values(json!({"save_dc": 13}))),
                Mutation::complete("spellcasting"),
            ],
        )
        .unwrap();
        assert!(state.is_completed("spellcasting"));

        let state = apply(
            &state,
            &[Mutation::set("ability_scores", values(json!({"intelligence": 10})))],
        )
        .unwrap();
        assert!(state.is_completed("ability_scores"));
        assert!(!state.is_completed("spellcasting"));

        let state = apply(
            &state,
            &[Mutation::set("ability_scores", values(json!({"intelligence": 40})))],
        )
        .unwrap();
        assert!(!state.is_completed("ability_scores"));
    }

    #[test]
    fn test_skip_and_mode_rules() {
        let state = WorkflowState::new();
        let err = apply(&state, &[Mutation::Skip { step: "ability_scores".into() }]).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)));

        let state = apply(&state, &[Mutation::Skip { step: "portrait".into() }]).unwrap();
        assert!(state.is_skipped("portrait"));

        let state = apply(&state, &[Mutation::EnterEdit { step: "portrait".into() }]).unwrap();
        assert_eq!(state.mode, WorkflowMode::Edit);
        assert_eq!(state.edit_target.as_deref(), Some("portrait"));

        let state = apply(
            &state,
            &[
                Mutation::set("portrait", values(json!({"description": "tall"}))),
                Mutation::complete("portrait"),
            ],
        )
        .unwrap();
        assert_eq!(state.mode, WorkflowMode::Forward);
        assert!(state.edit_target.is_none());
        assert!(!state.is_skipped("portrait"));

        assert!(apply(&state, &[Mutation::ExitReview]).is_err());
        let state = apply(&state, &[Mutation::EnterReview]).unwrap();
        let state = apply(&state, &[Mutation::ExitReview]).unwrap();
        assert_eq!(state.mode, WorkflowMode::Forward);
    }

    #[test]
    fn test_edit_requires_satisfied_dependencies() {
        let state = WorkflowState::new();
        match apply(&state, &[Mutation::EnterEdit { step: "spellcasting".into() }]) {
            Err(EngineError::Validation(errors)) => {
                assert_eq!(errors[0].to_string(), "spellcasting: cannot edit yet; finish ability_scores first");
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let state = apply(
            &state,
            &[
                Mutation::set("ability_scores", values(json!({"intelligence": 16}))),
                Mutation::complete("ability_scores"),
            ],
        )
        .unwrap();
        let state = apply(&state, &[Mutation::EnterEdit { step: "spellcasting".into() }]).unwrap();
        assert_eq!(state.edit_target.as_deref(), Some("spellcasting"));

        let state = apply(&state, &[Mutation::ExitEdit]).unwrap();
        assert_eq!(state.mode, WorkflowMode::Forward);
        assert!(state.edit_target.is_none());
        assert!(matches!(apply(&state, &[Mutation::ExitEdit]), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_empty_set_leaves_no_bundle() {
        let state = apply(&WorkflowState::new(), &[Mutation::set("portrait", StepBundle::new())]).unwrap();
        assert_eq!(state.version, 1);
        assert!(state.bundle("portrait").is_none());
        assert!(state.fields.is_empty());
    }

    #[test]
    fn test_writes_elsewhere_keep_completed_steps() {
        let mut state = apply(
            &WorkflowState::new(),
            &[
                Mutation::set("ability_scores", values(json!({"intelligence": 16}))),
                Mutation::complete("ability_scores"),
                Mutation::set("spellcasting", values(json!({"save_dc": 13}))),
                Mutation::complete("spellcasting"),
            ],
        )
        .unwrap();

        let writes = vec![
            vec![Mutation::set("portrait", values(json!({"description": "tall"})))],
            vec![Mutation::complete("portrait")],
            vec![Mutation::ClearFields {
                step: "portrait".into(),
                fields: Vec::new(),
            }],
            vec![Mutation::Skip { step: "portrait".into() }],
            vec![Mutation::EnterReview],
            vec![Mutation::ExitReview],
        ];
        for write in writes {
            state = apply(&state, &write).unwrap();
            assert!(state.is_completed("ability_scores"), "after {:?}", write);
            assert!(state.is_completed("spellcasting"), "after {:?}", write);
        }
        assert_eq!(state.version, 7);
    }

    #[test]
    fn test_rejects_undeclared_targets_and_empty_writes() {
        let state = WorkflowState::new();
        assert!(matches!(
            apply(&state, &[Mutation::complete("ghost")]),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            apply(&state, &[Mutation::set("portrait", values(json!({"colour": "red"})))]),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(apply(&state, &[]), Err(EngineError::Protocol(_))));
    }
}
