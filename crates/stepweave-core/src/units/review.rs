use async_trait::async_trait;

use crate::error::{EngineError, ValidationError};
use crate::models::session::UserInput;
use crate::models::state::WorkflowState;
use crate::orchestration::{HandBack, StepContext, WorkerUnit};
use crate::store::Mutation;
use crate::units::form::display_value;
use crate::units::Command;
use crate::workflow::schema::WorkflowSchema;

/// Summary screen shown in REVIEW mode.
///
/// `confirm` returns to FORWARD; `edit <step>` reopens a step in EDIT mode.
/// The unit never writes step data.
pub struct ReviewUnit {
    unit_id: String,
}

impl ReviewUnit {
    pub fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
        }
    }

    fn summary(schema: &WorkflowSchema, state: &WorkflowState) -> String {
        let mut lines = vec![format!("Review: {}", schema.name())];
        for step in schema.steps_in_order() {
            let marker = if state.is_completed(&step.id) {
                "x"
            } else if state.is_skipped(&step.id) {
                "-"
            } else {
                " "
            };
            lines.push(format!("[{}] {} ({})", marker, step.title(), step.id));
            if let Some(bundle) = state.bundle(&step.id) {
                for (name, value) in bundle {
                    lines.push(format!("      {}: {}", name, display_value(value)));
                }
            }
        }
        lines.join("\n")
    }
}

#[async_trait]
impl WorkerUnit for ReviewUnit {
    fn unit_id(&self) -> &str {
        &self.unit_id
    }

    fn prompt(&self, schema: &WorkflowSchema, state: &WorkflowState) -> String {
        format!(
            "{}\n('confirm' to continue, 'edit <step>' to change a step)",
            Self::summary(schema, state)
        )
    }

    async fn run(&self, ctx: &mut StepContext, input: Option<UserInput>) -> Result<(), EngineError> {
        let Some(input) = input.filter(|i| !i.is_blank()) else {
            let prompt = self.prompt(ctx.schema(), ctx.state());
            return ctx.hand_back(HandBack::needs_input(prompt, Vec::new()));
        };

        match Command::parse(&input) {
            Command::Confirm | Command::Keep => {
                ctx.write(vec![Mutation::ExitReview]).await?;
                ctx.hand_back(HandBack::Completed {
                    message: Some("review confirmed".to_string()),
                })
            }
            Command::Edit(target) if ctx.schema().is_declared(&target) => {
                ctx.write(vec![Mutation::EnterEdit { step: target.clone() }]).await?;
                ctx.hand_back(HandBack::yielded(format!("editing '{}'", target)))
            }
            Command::Edit(target) => Err(EngineError::Validation(vec![ValidationError::step(
                &self.unit_id,
                format!("unknown step '{}'", target),
            )])),
            _ => Err(EngineError::Validation(vec![ValidationError::step(
                &self.unit_id,
                format!("expected 'confirm' or 'edit <step>', got '{}'", input.as_str().trim()),
            )])),
        }
    }
}
