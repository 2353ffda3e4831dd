//! Step resolver: maps a state snapshot to the next worker unit.
//!
//! Resolution is a pure function of `(schema, state)`. The priority order is
//! fixed: an explicit edit target wins, then review mode, then the first
//! ready step in dependency order. Only when every step is satisfied is the
//! final check run; a failing cross-step rule sends its owner step back for
//! repair instead of completing.

use crate::error::EngineError;
use crate::models::state::{WorkflowMode, WorkflowState};
use crate::models::step::{NextStep, StepDefinition};
use crate::validation::Validator;
use crate::workflow::schema::WorkflowSchema;

pub struct StepResolver<'a> {
    schema: &'a WorkflowSchema,
    validator: Validator<'a>,
}

impl<'a> StepResolver<'a> {
    pub fn new(schema: &'a WorkflowSchema, validator: Validator<'a>) -> Self {
        Self { schema, validator }
    }

    pub fn resolve(&self, state: &WorkflowState) -> Result<NextStep, EngineError> {
        match state.mode {
            WorkflowMode::Edit => {
                let target = state.edit_target.as_deref().ok_or_else(|| {
                    EngineError::Protocol("session is in EDIT mode without an edit target".into())
                })?;
                if !self.schema.is_declared(target) {
                    return Err(EngineError::Protocol(format!(
                        "edit target '{}' is not a declared step",
                        target
                    )));
                }
                Ok(NextStep::edit(target))
            }
            WorkflowMode::Review => {
                let unit = self.schema.review_unit().ok_or_else(|| {
                    EngineError::Protocol(format!(
                        "workflow '{}' has no review unit",
                        self.schema.name()
                    ))
                })?;
                Ok(NextStep::review(unit))
            }
            WorkflowMode::Forward => Ok(self.resolve_forward(state)),
        }
    }

    fn resolve_forward(&self, state: &WorkflowState) -> NextStep {
        let ready: Vec<&StepDefinition> = self
            .schema
            .steps_in_order()
            .filter(|step| !state.is_satisfied(step))
            .filter(|step| step.depends_on.iter().all(|dep| self.is_satisfied_id(state, dep)))
            .collect();

        if let Some(step) = ready.iter().find(|s| !s.parallel) {
            return NextStep::forward(&step.id, self.forward_reason(state, step), Vec::new());
        }

        if let Some((first, rest)) = ready.split_first() {
            let also_ready = rest.iter().map(|s| s.id.clone()).collect();
            return NextStep::forward(&first.id, self.forward_reason(state, first), also_ready);
        }

        // `valid` is exactly `errors.is_empty()`
        let report = self.validator.validate_complete(state);
        match report.errors.first() {
            Some(err) => NextStep::repair(&err.step, format!("inconsistent: {}", err)),
            None => NextStep::complete(),
        }
    }

    fn forward_reason(&self, state: &WorkflowState, step: &StepDefinition) -> String {
        if state.bundle(&step.id).map(|b| !b.is_empty()).unwrap_or(false) {
            format!("'{}' has unfinished data", step.title())
        } else if step.depends_on.is_empty() {
            format!("'{}' is the next step", step.title())
        } else {
            format!(
                "dependencies of '{}' are satisfied ({})",
                step.title(),
                step.depends_on.join(", ")
            )
        }
    }

    fn is_satisfied_id(&self, state: &WorkflowState, id: &str) -> bool {
        self.schema
            .step(id)
            .map(|step| state.is_satisfied(step))
            .unwrap_or(false)
    }
}
