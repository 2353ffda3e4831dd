use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{EngineError, ValidationError};
use crate::models::session::UserInput;
use crate::models::state::{StepBundle, WorkflowState};
use crate::models::step::{FieldKind, StepDefinition};
use crate::orchestration::{HandBack, StepContext, WorkerUnit};
use crate::store::Mutation;
use crate::units::Command;
use crate::validation::sorted_items;
use crate::workflow::catalog::Catalog;
use crate::workflow::schema::WorkflowSchema;

/// Generic handler that fills a step bundle from `key=value` answers.
///
/// Accepted input:
/// - `name=Elf; speed=30` (pairs separated by `;` or newlines)
/// - `skills=Arcana, History` (list items separated by `,`)
/// - a JSON object
/// - a bare value when the step has a single field
/// - the control words `skip`, `keep`, `review`, `edit <step>`
///
/// Valid fields are written even when others are rejected, so an answer
/// can be completed over several turns.
pub struct FormUnit {
    step_id: String,
}

impl FormUnit {
    pub fn new(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
        }
    }

    async fn answer(&self, ctx: &mut StepContext, text: &str) -> Result<(), EngineError> {
        let step = ctx.schema().require_step(&self.step_id)?.clone();
        let (values, mut errors) = parse_answer(&step, ctx.catalog(), text);

        let mut accepted = StepBundle::new();
        {
            let validator = ctx.validator();
            for (name, value) in values {
                let field_errors = validator.validate_field(&step.id, &name, &value);
                if field_errors.is_empty() {
                    accepted.insert(name, value);
                } else {
                    errors.extend(field_errors);
                }
            }
        }

        let mut merged = ctx.state().clone();
        {
            let validator = ctx.validator();
            let bundle = merged.fields.entry(step.id.clone()).or_default();
            bundle.extend(accepted.clone());

            // Fields granted by a chosen catalog option are not up to the user.
            for (name, value) in validator.granted_values(&step, bundle) {
                if let Some(typed) = accepted.get(&name) {
                    if sorted_items(typed) != sorted_items(&value) {
                        errors.push(ValidationError::field(
                            &step.id,
                            &name,
                            format!("comes with this choice ({})", display_value(&value)),
                        ));
                    }
                }
                if bundle.get(&name) != Some(&value) || accepted.contains_key(&name) {
                    accepted.insert(name.clone(), value.clone());
                }
                bundle.insert(name, value);
            }
            errors.extend(validator.validate_step_rules(&step, bundle));
        }
        let complete = ctx.validator().is_step_complete(&merged, &step.id);

        // Catch rules this step owns against steps that are already done,
        // instead of completing now and being sent back for repair later.
        if complete && errors.is_empty() {
            if !merged.is_completed(&step.id) {
                merged.completed_steps.push(step.id.clone());
            }
            errors.extend(
                ctx.validator()
                    .validate_cross_step(&merged)
                    .into_iter()
                    .filter(|e| e.step == step.id),
            );
        }

        let mut mutations = Vec::new();
        if !accepted.is_empty() {
            mutations.push(Mutation::set(&step.id, accepted));
        }
        if complete && errors.is_empty() {
            mutations.push(Mutation::complete(&step.id));
        }
        if !mutations.is_empty() {
            ctx.write(mutations).await?;
        }

        if complete && errors.is_empty() {
            tracing::debug!("[FormUnit] Step '{}' completed", step.id);
            return ctx.hand_back(HandBack::Completed {
                message: Some(format!("{} saved", step.title())),
            });
        }

        let prompt = describe_missing(&step, ctx.state());
        ctx.hand_back(HandBack::needs_input(prompt, errors))
    }
}

#[async_trait]
impl WorkerUnit for FormUnit {
    fn unit_id(&self) -> &str {
        &self.step_id
    }

    fn prompt(&self, schema: &WorkflowSchema, state: &WorkflowState) -> String {
        match schema.step(&self.step_id) {
            Some(step) => describe_step(step, state, schema.review_unit().is_some()),
            None => format!("Input for '{}':", self.step_id),
        }
    }

    async fn run(&self, ctx: &mut StepContext, input: Option<UserInput>) -> Result<(), EngineError> {
        let Some(input) = input.filter(|i| !i.is_blank()) else {
            let prompt = self.prompt(ctx.schema(), ctx.state());
            return ctx.hand_back(HandBack::needs_input(prompt, Vec::new()));
        };

        let skippable = ctx.step().map(|s| s.skippable).unwrap_or(false);
        match Command::parse(&input) {
            Command::Skip if skippable => {
                ctx.write(vec![Mutation::Skip {
                    step: self.step_id.clone(),
                }])
                .await?;
                ctx.hand_back(HandBack::Completed {
                    message: Some(format!("'{}' skipped", self.step_id)),
                })
            }
            Command::Skip => Err(EngineError::Validation(vec![ValidationError::step(
                &self.step_id,
                "this step cannot be skipped",
            )])),
            Command::Review if ctx.schema().review_unit().is_some() => {
                ctx.write(vec![Mutation::EnterReview]).await?;
                ctx.hand_back(HandBack::yielded("review requested"))
            }
            Command::Edit(target) if ctx.schema().is_declared(&target) => {
                ctx.write(vec![Mutation::EnterEdit { step: target.clone() }]).await?;
                ctx.hand_back(HandBack::yielded(format!("editing '{}'", target)))
            }
            Command::Edit(target) => Err(EngineError::Validation(vec![ValidationError::step(
                &self.step_id,
                format!("unknown step '{}'", target),
            )])),
            Command::Keep => {
                ctx.write(vec![Mutation::complete(&self.step_id)]).await?;
                ctx.hand_back(HandBack::Completed {
                    message: Some(format!("kept existing '{}'", self.step_id)),
                })
            }
            Command::Review | Command::Confirm => {
                self.answer(ctx, input.as_str()).await
            }
            Command::Answer(text) => self.answer(ctx, &text).await,
        }
    }
}

/// Split an answer into typed field values. Unknown keys and malformed
/// segments are returned as errors; values are not validated here.
pub(crate) fn parse_answer(
    step: &StepDefinition,
    catalog: &dyn Catalog,
    text: &str,
) -> (Vec<(String, Value)>, Vec<ValidationError>) {
    let text = text.trim();
    let mut values = Vec::new();
    let mut errors = Vec::new();

    if text.starts_with('{') {
        match serde_json::from_str::<Map<String, Value>>(text) {
            Ok(object) => {
                for (key, value) in object {
                    match step.field(&key) {
                        Some(spec) => values.push((key, canonicalize(&spec.kind, catalog, value))),
                        None => errors.push(ValidationError::field(&step.id, &key, "unknown field")),
                    }
                }
            }
            Err(e) => errors.push(ValidationError::step(&step.id, format!("invalid JSON: {}", e))),
        }
        return (values, errors);
    }

    if !text.contains('=') {
        if let [only] = step.fields.as_slice() {
            values.push((only.name.clone(), coerce(&only.kind, catalog, text)));
            return (values, errors);
        }
    }

    for segment in text.split(|c: char| c == ';' || c == '\n') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let Some((key, raw)) = segment.split_once('=') else {
            errors.push(ValidationError::step(
                &step.id,
                format!("expected key=value, got '{}'", segment),
            ));
            continue;
        };
        let key = key.trim();
        match step.fields.iter().find(|f| f.name.eq_ignore_ascii_case(key)) {
            Some(spec) => values.push((spec.name.clone(), coerce(&spec.kind, catalog, raw.trim()))),
            None => errors.push(ValidationError::field(&step.id, key, "unknown field")),
        }
    }

    (values, errors)
}

/// Turn raw text into the JSON shape the field kind expects. Text that
/// cannot be converted is kept as a string so validation can report it.
fn coerce(kind: &FieldKind, catalog: &dyn Catalog, raw: &str) -> Value {
    match kind {
        FieldKind::Text { .. } => Value::String(raw.to_string()),
        FieldKind::Integer { .. } => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        FieldKind::Flag => match raw.to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Value::Bool(true),
            "no" | "n" | "false" | "0" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        },
        FieldKind::List { item, .. } => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| coerce(item, catalog, s))
                .collect(),
        ),
        FieldKind::Choice { .. } | FieldKind::Catalog { .. } => {
            canonicalize(kind, catalog, Value::String(raw.to_string()))
        }
    }
}

/// Replace case-insensitive matches with the canonical option name.
fn canonicalize(kind: &FieldKind, catalog: &dyn Catalog, value: Value) -> Value {
    match (kind, value) {
        (FieldKind::Choice { options }, Value::String(s)) => options
            .iter()
            .find(|o| o.eq_ignore_ascii_case(s.trim()))
            .map(|o| Value::String(o.clone()))
            .unwrap_or(Value::String(s)),
        (FieldKind::Catalog { category, filters }, Value::String(s)) => catalog
            .lookup(category, filters)
            .into_iter()
            .find(|o| o.name.eq_ignore_ascii_case(s.trim()))
            .map(|o| Value::String(o.name))
            .unwrap_or(Value::String(s)),
        (FieldKind::List { item, .. }, Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|v| canonicalize(item, catalog, v))
                .collect(),
        ),
        (_, value) => value,
    }
}

fn describe_step(step: &StepDefinition, state: &WorkflowState, has_review: bool) -> String {
    let mut lines = vec![step.title().to_string()];
    if let Some(description) = &step.description {
        lines.push(description.clone());
    }
    for field in &step.fields {
        let current = state
            .field(&step.id, &field.name)
            .map(|v| format!(" [current: {}]", display_value(v)))
            .unwrap_or_default();
        let optional = if field.required { "" } else { ", optional" };
        lines.push(format!(
            "  {} ({}{}){}",
            field.name,
            field.kind.describe(),
            optional,
            current
        ));
    }
    let mut hints = vec!["answer with key=value; key=value"];
    if step.skippable {
        hints.push("'skip'");
    }
    if state.bundle(&step.id).map(|b| !b.is_empty()).unwrap_or(false) {
        hints.push("'keep'");
    }
    if has_review {
        hints.push("'review'");
    }
    lines.push(format!("({})", hints.join(", ")));
    lines.join("\n")
}

fn describe_missing(step: &StepDefinition, state: &WorkflowState) -> String {
    let missing: Vec<String> = step
        .required_fields()
        .filter(|f| state.field(&step.id, &f.name).is_none())
        .map(|f| format!("{} ({})", f.name, f.kind.describe()))
        .collect();
    if missing.is_empty() {
        format!("Please correct the values for '{}'.", step.title())
    } else {
        format!("Still needed for '{}': {}", step.title(), missing.join(", "))
    }
}

pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        other => other.to_string(),
    }
}
