//! YAML schema types for workflow definitions.
//!
//! A workflow YAML declares the steps of a session, their dependencies and
//! bundle fields, and the cross-step rules checked between completed steps:
//!
//! ```yaml
//! name: "character"
//! version: "1.0"
//! review_unit: review
//!
//! steps:
//!   - id: race
//!     fields:
//!       - name: race
//!         kind: { type: catalog, category: race }
//!   - id: spellbook
//!     depends_on: [race]
//!     parallel: true
//!     fields:
//!       - name: spells
//!         kind: { type: list, item: { type: text }, min_items: 6, max_items: 6 }
//!
//! cross_checks:
//!   - rule: subset
//!     owner: prepared.spells
//!     of: spellbook.spells
//! ```
//!
//! A definition is compiled into a [`WorkflowSchema`] once at startup; every
//! structural mistake (duplicate ids, unknown dependencies, cycles, rules
//! that reference undeclared fields) is reported then, not mid-session.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::step::{FieldKind, StepDefinition, StepRule, COMPLETE_TARGET};
use crate::workflow::catalog::{CatalogOption, StaticCatalog};

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (recorded on every session)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    /// Worker unit dispatched while the session is in REVIEW mode
    #[serde(default)]
    pub review_unit: Option<String>,

    /// Steps in declaration order (the tie-break order)
    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub cross_checks: Vec<CrossStepRule>,

    /// Inline reference data for `catalog` fields
    #[serde(default)]
    pub catalog: BTreeMap<String, Vec<CatalogOption>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::InvalidWorkflow(format!("Failed to parse workflow YAML: {}", e)))
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidWorkflow(format!("Failed to read workflow file '{}': {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    /// The inline catalog of this definition.
    pub fn inline_catalog(&self) -> StaticCatalog {
        StaticCatalog::from_map(self.catalog.clone())
    }
}

/// Reference to `step.field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRef {
    pub step: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(step: &str, field: &str) -> Self {
        Self {
            step: step.to_string(),
            field: field.to_string(),
        }
    }
}

impl TryFrom<String> for FieldRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.split_once('.') {
            Some((step, field)) if !step.is_empty() && !field.is_empty() => {
                Ok(Self::new(step.trim(), field.trim()))
            }
            _ => Err(format!("field reference '{}' must look like 'step.field'", value)),
        }
    }
}

impl From<FieldRef> for String {
    fn from(r: FieldRef) -> Self {
        format!("{}.{}", r.step, r.field)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.step, self.field)
    }
}

/// Compatibility rule between two steps' bundles.
///
/// The `owner` step is the one returned for re-resolution when the rule
/// fails. A rule only fires once both steps are completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossStepRule {
    /// Every item of `owner` must appear in `of`
    Subset { owner: FieldRef, of: FieldRef },
    /// `owner` and `other` share no item
    Disjoint { owner: FieldRef, other: FieldRef },
    /// Number of items in `owner` must not exceed the integer at `limit`
    MaxItemsFrom { owner: FieldRef, limit: FieldRef },
    /// Every value of `owner` must be an option of `category` whose
    /// `filter_key` tag matches the value at `filter_from`
    CatalogFilter {
        owner: FieldRef,
        category: String,
        filter_key: String,
        filter_from: FieldRef,
    },
}

impl CrossStepRule {
    pub fn owner(&self) -> &FieldRef {
        match self {
            CrossStepRule::Subset { owner, .. }
            | CrossStepRule::Disjoint { owner, .. }
            | CrossStepRule::MaxItemsFrom { owner, .. }
            | CrossStepRule::CatalogFilter { owner, .. } => owner,
        }
    }

    pub fn other(&self) -> &FieldRef {
        match self {
            CrossStepRule::Subset { of, .. } => of,
            CrossStepRule::Disjoint { other, .. } => other,
            CrossStepRule::MaxItemsFrom { limit, .. } => limit,
            CrossStepRule::CatalogFilter { filter_from, .. } => filter_from,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CrossStepRule::Subset { .. } => "subset",
            CrossStepRule::Disjoint { .. } => "disjoint",
            CrossStepRule::MaxItemsFrom { .. } => "max_items_from",
            CrossStepRule::CatalogFilter { .. } => "catalog_filter",
        }
    }
}

/// A compiled, validated workflow.
#[derive(Debug, Clone)]
pub struct WorkflowSchema {
    name: String,
    version: String,
    description: Option<String>,
    review_unit: Option<String>,
    steps: Vec<StepDefinition>,
    /// Indices into `steps` in dependency order, ties broken by declaration
    order: Vec<usize>,
    index: HashMap<String, usize>,
    cross_checks: Vec<CrossStepRule>,
}

impl WorkflowSchema {
    /// Validate a definition and compute its dependency order.
    pub fn compile(def: &WorkflowDefinition) -> Result<Self, EngineError> {
        let invalid = |msg: String| EngineError::InvalidWorkflow(format!("{}: {}", def.name, msg));

        if def.name.trim().is_empty() {
            return Err(EngineError::InvalidWorkflow("workflow name must not be empty".into()));
        }
        if def.steps.is_empty() {
            return Err(invalid("workflow declares no steps".into()));
        }

        let mut index = HashMap::new();
        for (i, step) in def.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(invalid(format!("step #{} has an empty id", i + 1)));
            }
            if step.id == COMPLETE_TARGET {
                return Err(invalid(format!("'{}' is a reserved identifier", COMPLETE_TARGET)));
            }
            if index.insert(step.id.clone(), i).is_some() {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
            if step.fields.is_empty() {
                return Err(invalid(format!("step '{}' declares no fields", step.id)));
            }
            if !step.fields.iter().any(|f| f.required) {
                return Err(invalid(format!("step '{}' has no required field", step.id)));
            }
            let mut names = HashSet::new();
            for field in &step.fields {
                if !names.insert(field.name.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' declares field '{}' twice",
                        step.id, field.name
                    )));
                }
                if let FieldKind::List { item, .. } = &field.kind {
                    if matches!(item.as_ref(), FieldKind::List { .. }) {
                        return Err(invalid(format!(
                            "field '{}.{}' nests a list inside a list",
                            step.id, field.name
                        )));
                    }
                }
            }
            for rule in &step.rules {
                for name in rule.referenced_fields() {
                    if step.field(name).is_none() {
                        return Err(invalid(format!(
                            "{} rule on step '{}' references undeclared field '{}'",
                            rule.name(),
                            step.id,
                            name
                        )));
                    }
                }
                if let StepRule::TaggedBy { option_field, .. } | StepRule::GrantedBy { option_field, .. } = rule {
                    let is_catalog = step
                        .field(option_field)
                        .map(|f| matches!(f.kind, FieldKind::Catalog { .. }))
                        .unwrap_or(false);
                    if !is_catalog {
                        return Err(invalid(format!(
                            "{} rule on step '{}' needs '{}' to be a catalog field",
                            rule.name(),
                            step.id,
                            option_field
                        )));
                    }
                }
            }
        }

        if let Some(review) = &def.review_unit {
            if index.contains_key(review) || review == COMPLETE_TARGET {
                return Err(invalid(format!(
                    "review unit '{}' collides with a step id",
                    review
                )));
            }
        }

        for step in &def.steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(invalid(format!("step '{}' depends on itself", step.id)));
                }
                if !index.contains_key(dep) {
                    return Err(invalid(format!(
                        "step '{}' depends on undeclared step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        let order = dependency_order(&def.steps, &index)
            .ok_or_else(|| invalid("step dependencies contain a cycle".into()))?;

        for rule in &def.cross_checks {
            for r in [rule.owner(), rule.other()] {
                let step = index
                    .get(&r.step)
                    .map(|&i| &def.steps[i])
                    .ok_or_else(|| {
                        invalid(format!("{} rule references undeclared step '{}'", rule.name(), r.step))
                    })?;
                if step.field(&r.field).is_none() {
                    return Err(invalid(format!(
                        "{} rule references undeclared field '{}'",
                        rule.name(),
                        r
                    )));
                }
            }
            if rule.owner().step == rule.other().step {
                return Err(invalid(format!(
                    "{} rule on '{}' must relate two different steps",
                    rule.name(),
                    rule.owner()
                )));
            }
        }

        Ok(Self {
            name: def.name.clone(),
            version: def.version.clone(),
            description: def.description.clone(),
            review_unit: def.review_unit.clone(),
            steps: def.steps.clone(),
            order,
            index,
            cross_checks: def.cross_checks.clone(),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        Self::compile(&WorkflowDefinition::from_yaml(yaml)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn review_unit(&self) -> Option<&str> {
        self.review_unit.as_deref()
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    /// Steps in dependency order.
    pub fn steps_in_order(&self) -> impl Iterator<Item = &StepDefinition> {
        self.order.iter().map(|&i| &self.steps[i])
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn require_step(&self, id: &str) -> Result<&StepDefinition, EngineError> {
        self.step(id)
            .ok_or_else(|| EngineError::NotFound(format!("step '{}' in workflow '{}'", id, self.name)))
    }

    pub fn is_declared(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn cross_checks(&self) -> &[CrossStepRule] {
        &self.cross_checks
    }

    /// Every worker-unit id the workflow needs a handler for.
    pub fn unit_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        if let Some(review) = &self.review_unit {
            ids.push(review);
        }
        ids
    }

    /// Steps whose transitive dependencies include `step`.
    pub fn dependents_of(&self, step: &str) -> Vec<&StepDefinition> {
        self.steps_in_order()
            .filter(|candidate| candidate.id != step && self.depends_transitively(&candidate.id, step))
            .collect()
    }

    fn depends_transitively(&self, from: &str, target: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(def) = self.step(id) {
                for dep in &def.depends_on {
                    if dep == target {
                        return true;
                    }
                    stack.push(dep);
                }
            }
        }
        false
    }
}

/// Stable topological sort: at every round, place the earliest-declared step
/// whose dependencies are already placed.
fn dependency_order(steps: &[StepDefinition], index: &HashMap<String, usize>) -> Option<Vec<usize>> {
    let mut placed = vec![false; steps.len()];
    let mut order = Vec::with_capacity(steps.len());

    while order.len() < steps.len() {
        let next = (0..steps.len()).find(|&i| {
            !placed[i]
                && steps[i]
                    .depends_on
                    .iter()
                    .all(|dep| index.get(dep).map(|&d| placed[d]).unwrap_or(false))
        })?;
        placed[next] = true;
        order.push(next);
    }

    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: &str = r#"
name: "linear"
steps:
  - id: race
    fields:
      - name: race
        kind: { type: text }
  - id: ability_scores
    depends_on: [race]
    fields:
      - name: intelligence
        kind: { type: integer, min: 3, max: 18 }
  - id: class
    depends_on: [ability_scores]
    fields:
      - name: class_name
        kind: { type: choice, options: [Wizard] }
"#;

    #[test]
    fn test_parse_minimal_workflow() {
        let schema = WorkflowSchema::from_yaml(LINEAR).unwrap();
        assert_eq!(schema.name(), "linear");
        assert_eq!(schema.version(), "1.0");
        assert_eq!(schema.steps().len(), 3);
        let order: Vec<_> = schema.steps_in_order().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["race", "ability_scores", "class"]);
        assert!(schema.review_unit().is_none());
    }

    #[test]
    fn test_dependency_order_overrides_declaration() {
        let yaml = r#"
name: "reordered"
steps:
  - id: b
    depends_on: [a]
    fields: [{ name: x, kind: { type: flag } }]
  - id: c
    fields: [{ name: x, kind: { type: flag } }]
  - id: a
    fields: [{ name: x, kind: { type: flag } }]
"#;
        let schema = WorkflowSchema::from_yaml(yaml).unwrap();
        let order: Vec<_> = schema.steps_in_order().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        let dependents: Vec<_> = schema.dependents_of("a").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(dependents, vec!["b"]);
    }

    #[test]
    fn test_rejects_cycles_and_unknown_references() {
        let cycle = r#"
name: "cycle"
steps:
  - id: a
    depends_on: [b]
    fields: [{ name: x, kind: { type: flag } }]
  - id: b
    depends_on: [a]
    fields: [{ name: x, kind: { type: flag } }]
"#;
        let err = WorkflowSchema::from_yaml(cycle).unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let unknown = r#"
name: "unknown"
steps:
  - id: a
    depends_on: [ghost]
    fields: [{ name: x, kind: { type: flag } }]
"#;
        let err = WorkflowSchema::from_yaml(unknown).unwrap_err();
        assert!(err.to_string().contains("undeclared step 'ghost'"));

        let bad_rule = r#"
name: "bad-rule"
steps:
  - id: a
    fields: [{ name: x, kind: { type: flag } }]
  - id: b
    fields: [{ name: y, kind: { type: flag } }]
cross_checks:
  - rule: subset
    owner: a.x
    of: b.missing
"#;
        let err = WorkflowSchema::from_yaml(bad_rule).unwrap_err();
        assert!(err.to_string().contains("b.missing"));
    }

    #[test]
    fn test_rejects_duplicate_and_reserved_ids() {
        let dup = r#"
name: "dup"
steps:
  - id: a
    fields: [{ name: x, kind: { type: flag } }]
  - id: a
    fields: [{ name: x, kind: { type: flag } }]
"#;
        assert!(WorkflowSchema::from_yaml(dup).is_err());

        let reserved = r#"
name: "reserved"
steps:
  - id: complete
    fields: [{ name: x, kind: { type: flag } }]
"#;
        assert!(WorkflowSchema::from_yaml(reserved).is_err());
    }

    #[test]
    fn test_rejects_step_rules_on_undeclared_or_plain_fields() {
        let undeclared = r#"
name: "rules"
steps:
  - id: background
    fields:
      - name: plus_two
        kind: { type: text }
    rules:
      - rule: distinct
        fields: [plus_two, plus_one]
"#;
        let err = WorkflowSchema::from_yaml(undeclared).unwrap_err();
        assert!(err.to_string().contains("undeclared field 'plus_one'"), "{}", err);

        let plain = r#"
name: "rules"
steps:
  - id: background
    fields:
      - name: background
        kind: { type: text }
      - name: plus_two
        kind: { type: text }
    rules:
      - rule: tagged_by
        fields: [plus_two]
        category: background
        option_field: background
        tag: ability
"#;
        let err = WorkflowSchema::from_yaml(plain).unwrap_err();
        assert!(err.to_string().contains("catalog field"), "{}", err);
    }

    #[test]
    fn test_field_ref_parsing() {
        let r: FieldRef = serde_yaml::from_str("\"prepared.spells\"").unwrap();
        assert_eq!(r, FieldRef::new("prepared", "spells"));
        assert!(serde_yaml::from_str::<FieldRef>("\"nodot\"").is_err());
    }
}
