use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::session::UserInput;
use crate::models::state::WorkflowState;
use crate::orchestration::StepContext;
use crate::units::{FormUnit, ReviewUnit};
use crate::workflow::schema::WorkflowSchema;

/// Stage-specific handler dispatched by the coordinator.
///
/// `run` must end by calling [`StepContext::hand_back`] exactly once.
/// Returning `Err(EngineError::Validation(_))` is treated as a request to
/// re-prompt; any other error halts the session.
#[async_trait]
pub trait WorkerUnit: Send + Sync {
    fn unit_id(&self) -> &str;

    /// Units that derive their data from earlier steps return `false` and
    /// are dispatched without consuming user input.
    fn needs_input(&self) -> bool {
        true
    }

    /// First prompt shown for this unit.
    fn prompt(&self, _schema: &WorkflowSchema, _state: &WorkflowState) -> String {
        format!("Input for '{}':", self.unit_id())
    }

    async fn run(&self, ctx: &mut StepContext, input: Option<UserInput>) -> Result<(), EngineError>;
}

/// Lookup from unit id to handler, checked against the workflow at build time.
pub struct WorkerRegistry {
    units: HashMap<String, Arc<dyn WorkerUnit>>,
}

impl WorkerRegistry {
    pub fn builder() -> WorkerRegistryBuilder {
        WorkerRegistryBuilder { units: Vec::new() }
    }

    /// A generic form unit for every step plus the review unit.
    pub fn with_form_units(schema: &WorkflowSchema) -> Result<Self, EngineError> {
        let mut builder = Self::builder();
        for step in schema.steps() {
            builder = builder.register(Arc::new(FormUnit::new(&step.id)));
        }
        if let Some(review) = schema.review_unit() {
            builder = builder.register(Arc::new(ReviewUnit::new(review)));
        }
        builder.build(schema)
    }

    pub fn get(&self, unit_id: &str) -> Result<Arc<dyn WorkerUnit>, EngineError> {
        self.units
            .get(unit_id)
            .cloned()
            .ok_or_else(|| EngineError::Protocol(format!("no worker unit registered for '{}'", unit_id)))
    }

    pub fn unit_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.units.keys().map(|k| k.as_str()).collect();
        ids.sort();
        ids
    }
}

pub struct WorkerRegistryBuilder {
    units: Vec<Arc<dyn WorkerUnit>>,
}

impl WorkerRegistryBuilder {
    pub fn register(mut self, unit: Arc<dyn WorkerUnit>) -> Self {
        self.units.push(unit);
        self
    }

    /// Every step and the review unit must have exactly one handler, and
    /// no handler may target an id the workflow does not declare.
    pub fn build(self, schema: &WorkflowSchema) -> Result<WorkerRegistry, EngineError> {
        let declared = schema.unit_ids();
        let mut units: HashMap<String, Arc<dyn WorkerUnit>> = HashMap::new();

        for unit in self.units {
            let id = unit.unit_id().to_string();
            if !declared.contains(&id.as_str()) {
                return Err(EngineError::InvalidWorkflow(format!(
                    "worker unit '{}' does not match any step of '{}'",
                    id,
                    schema.name()
                )));
            }
            if units.insert(id.clone(), unit).is_some() {
                return Err(EngineError::InvalidWorkflow(format!(
                    "worker unit '{}' registered twice",
                    id
                )));
            }
        }

        let missing: Vec<&str> = declared
            .into_iter()
            .filter(|id| !units.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::InvalidWorkflow(format!(
                "no worker unit for: {}",
                missing.join(", ")
            )));
        }

        Ok(WorkerRegistry { units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = r#"
name: "registry"
review_unit: review
steps:
  - id: race
    fields: [{ name: race, kind: { type: text } }]
  - id: class
    depends_on: [race]
    fields: [{ name: class_name, kind: { type: text } }]
"#;

    fn schema() -> WorkflowSchema {
        WorkflowSchema::from_yaml(WORKFLOW).unwrap()
    }

    fn expect_invalid(result: Result<WorkerRegistry, EngineError>, needle: &str) {
        match result {
            Err(EngineError::InvalidWorkflow(msg)) => assert!(msg.contains(needle), "{}", msg),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected registry build to fail"),
        }
    }

    #[test]
    fn test_form_units_cover_workflow() {
        let registry = WorkerRegistry::with_form_units(&schema()).unwrap();
        assert_eq!(registry.unit_ids(), vec!["class", "race", "review"]);
        assert!(matches!(registry.get("spells"), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn test_build_rejects_missing_unknown_and_duplicate_units() {
        let schema = schema();
        expect_invalid(
            WorkerRegistry::builder()
                .register(Arc::new(FormUnit::new("race")))
                .register(Arc::new(ReviewUnit::new("review")))
                .build(&schema),
            "class",
        );
        expect_invalid(
            WorkerRegistry::builder()
                .register(Arc::new(FormUnit::new("spells")))
                .build(&schema),
            "spells",
        );
        expect_invalid(
            WorkerRegistry::builder()
                .register(Arc::new(FormUnit::new("race")))
                .register(Arc::new(FormUnit::new("race")))
                .build(&schema),
            "twice",
        );
    }
}
