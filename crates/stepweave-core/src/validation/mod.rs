//! Validation engine.
//!
//! Pure checks over a [`WorkflowState`]. Nothing here raises: every check
//! returns the list of [`ValidationError`]s it found, and callers decide
//! whether a failure rejects a write or is reported back to the user.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::ValidationError;
use crate::models::state::{StepBundle, WorkflowState};
use crate::models::step::{FieldKind, FieldSpec, StepDefinition, StepRule};
use crate::workflow::catalog::{Catalog, CatalogOption, Filters};
use crate::workflow::schema::{CrossStepRule, FieldRef, WorkflowSchema};

/// Outcome of the final, whole-session check.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

#[derive(Clone, Copy)]
pub struct Validator<'a> {
    schema: &'a WorkflowSchema,
    catalog: &'a dyn Catalog,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a WorkflowSchema, catalog: &'a dyn Catalog) -> Self {
        Self { schema, catalog }
    }

    /// Check a single field value against its declared kind.
    ///
    /// Unknown steps and fields are reported as errors rather than ignored.
    pub fn validate_field(&self, step_id: &str, field: &str, value: &Value) -> Vec<ValidationError> {
        let Some(step) = self.schema.step(step_id) else {
            return vec![ValidationError::step(step_id, "unknown step")];
        };
        let Some(spec) = step.field(field) else {
            return vec![ValidationError::field(step_id, field, "unknown field")];
        };
        let mut errors = Vec::new();
        self.check_kind(step_id, spec, &spec.kind, value, &mut errors);
        errors
    }

    /// Field-level errors plus missing required fields for a whole bundle.
    pub fn validate_bundle(&self, step: &StepDefinition, bundle: &StepBundle) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for spec in &step.fields {
            match bundle.get(&spec.name) {
                Some(Value::Null) | None if spec.required => errors.push(ValidationError::step(
                    &step.id,
                    format!("missing required field '{}'", spec.name),
                )),
                Some(Value::Null) | None => {}
                Some(value) => self.check_kind(&step.id, spec, &spec.kind, value, &mut errors),
            }
        }
        for key in bundle.keys() {
            if step.field(key).is_none() {
                errors.push(ValidationError::field(&step.id, key, "unknown field"));
            }
        }
        errors.extend(self.validate_step_rules(step, bundle));
        errors
    }

    /// Errors from the rules a step declares over its own fields. A rule is
    /// only evaluated for the fields that are already set.
    pub fn validate_step_rules(&self, step: &StepDefinition, bundle: &StepBundle) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for rule in &step.rules {
            match rule {
                StepRule::Distinct { fields } => {
                    let mut seen: Vec<(&str, &Value)> = Vec::new();
                    for name in fields {
                        let Some(value) = present(bundle, name) else {
                            continue;
                        };
                        let first = seen.iter().find(|(_, v)| *v == value).map(|(n, _)| *n);
                        match first {
                            Some(first) => errors.push(ValidationError::field(
                                &step.id,
                                name,
                                format!("must differ from {}", first),
                            )),
                            None => seen.push((name.as_str(), value)),
                        }
                    }
                }
                StepRule::TaggedBy {
                    fields,
                    category,
                    option_field,
                    tag,
                } => {
                    let Some(option) = self.chosen_option(bundle, category, option_field) else {
                        continue;
                    };
                    let allowed = option.tags.get(tag).cloned().unwrap_or_default();
                    for name in fields {
                        let Some(value) = present(bundle, name).and_then(|v| v.as_str()) else {
                            continue;
                        };
                        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
                            errors.push(ValidationError::field(
                                &step.id,
                                name,
                                format!(
                                    "'{}' is not offered by {} (choose from {})",
                                    value,
                                    option.name,
                                    allowed.join(", ")
                                ),
                            ));
                        }
                    }
                }
                StepRule::GrantedBy {
                    field,
                    category,
                    option_field,
                    attribute,
                } => {
                    let Some(option) = self.chosen_option(bundle, category, option_field) else {
                        continue;
                    };
                    let Some(value) = present(bundle, field) else {
                        continue;
                    };
                    let granted = option.attributes.get(attribute).map(sorted_items).unwrap_or_default();
                    if sorted_items(value) != granted {
                        errors.push(ValidationError::field(
                            &step.id,
                            field,
                            format!("{} grants {}", option.name, granted.join(", ")),
                        ));
                    }
                }
            }
        }
        errors
    }

    /// Values the step's `granted_by` rules dictate for `bundle`.
    pub fn granted_values(&self, step: &StepDefinition, bundle: &StepBundle) -> StepBundle {
        let mut granted = StepBundle::new();
        for rule in &step.rules {
            if let StepRule::GrantedBy {
                field,
                category,
                option_field,
                attribute,
            } = rule
            {
                let value = self
                    .chosen_option(bundle, category, option_field)
                    .and_then(|option| option.attributes.get(attribute).cloned());
                if let Some(value) = value {
                    granted.insert(field.clone(), value);
                }
            }
        }
        granted
    }

    fn chosen_option(&self, bundle: &StepBundle, category: &str, option_field: &str) -> Option<CatalogOption> {
        let name = present(bundle, option_field)?.as_str()?;
        self.catalog.find(category, name)
    }

    /// True iff every required field is present and every present field is
    /// individually valid.
    pub fn is_step_complete(&self, state: &WorkflowState, step_id: &str) -> bool {
        let Some(step) = self.schema.step(step_id) else {
            return false;
        };
        match state.bundle(step_id) {
            Some(bundle) if !bundle.is_empty() => self.validate_bundle(step, bundle).is_empty(),
            _ => false,
        }
    }

    /// Evaluate every cross-step rule whose two steps are both completed.
    pub fn validate_cross_step(&self, state: &WorkflowState) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for rule in self.schema.cross_checks() {
            let owner = rule.owner();
            let other = rule.other();
            if !state.is_completed(&owner.step) || !state.is_completed(&other.step) {
                continue;
            }
            if let Some(err) = self.check_rule(state, rule) {
                errors.push(err);
            }
        }
        errors
    }

    /// Whole-session check: every non-skippable step is complete, completed
    /// steps still validate, and no cross-step rule fails.
    pub fn validate_complete(&self, state: &WorkflowState) -> CompletionReport {
        let mut errors = Vec::new();

        for step in self.schema.steps_in_order() {
            if state.is_completed(&step.id) {
                if !self.is_step_complete(state, &step.id) {
                    errors.push(ValidationError::final_check(
                        &step.id,
                        "marked complete but its data no longer validates",
                    ));
                }
            } else if !step.skippable {
                errors.push(ValidationError::final_check(&step.id, "step is not complete"));
            }
        }

        errors.extend(self.validate_cross_step(state));

        CompletionReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn check_kind(
        &self,
        step_id: &str,
        spec: &FieldSpec,
        kind: &FieldKind,
        value: &Value,
        errors: &mut Vec<ValidationError>,
    ) {
        let err = |msg: String| ValidationError::field(step_id, &spec.name, msg);

        match kind {
            FieldKind::Text { min_len, max_len } => match value.as_str() {
                Some(s) => {
                    let len = s.trim().chars().count();
                    if len < *min_len {
                        errors.push(err(if *min_len == 1 {
                            "must not be empty".to_string()
                        } else {
                            format!("must be at least {} characters", min_len)
                        }));
                    }
                    if let Some(max) = max_len {
                        if len > *max {
                            errors.push(err(format!("must be at most {} characters", max)));
                        }
                    }
                }
                None => errors.push(err("must be text".to_string())),
            },
            FieldKind::Integer { min, max } => match value.as_i64() {
                Some(n) => {
                    let below = min.map(|lo| n < lo).unwrap_or(false);
                    let above = max.map(|hi| n > hi).unwrap_or(false);
                    if below || above {
                        errors.push(err(format!("{} is outside {}", n, kind.describe())));
                    }
                }
                None => errors.push(err("must be an integer".to_string())),
            },
            FieldKind::Choice { options } => match value.as_str() {
                Some(s) if options.iter().any(|o| o == s) => {}
                Some(s) => errors.push(err(format!("'{}' is not {}", s, kind.describe()))),
                None => errors.push(err("must be text".to_string())),
            },
            FieldKind::Catalog { category, filters } => match value.as_str() {
                Some(s) => {
                    let known = self
                        .catalog
                        .lookup(category, filters)
                        .iter()
                        .any(|o| o.name == s);
                    if !known {
                        errors.push(err(format!("'{}' is not a valid {}", s, category.replace('_', " "))));
                    }
                }
                None => errors.push(err("must be text".to_string())),
            },
            FieldKind::List {
                item,
                min_items,
                max_items,
                unique,
            } => {
                let Some(items) = value.as_array() else {
                    errors.push(err("must be a list".to_string()));
                    return;
                };
                let count_ok = items.len() >= *min_items
                    && max_items.map(|max| items.len() <= max).unwrap_or(true);
                if !count_ok {
                    errors.push(err(format!(
                        "has {} item(s), expected {}",
                        items.len(),
                        kind.describe()
                    )));
                }
                if *unique {
                    let mut seen = HashSet::new();
                    for v in items {
                        if !seen.insert(v.to_string()) {
                            errors.push(err(format!("contains {} more than once", v)));
                        }
                    }
                }
                for v in items {
                    self.check_kind(step_id, spec, item, v, errors);
                }
            }
            FieldKind::Flag => {
                if !value.is_boolean() {
                    errors.push(err("must be yes or no".to_string()));
                }
            }
        }
    }

    fn check_rule(&self, state: &WorkflowState, rule: &CrossStepRule) -> Option<ValidationError> {
        let owner = rule.owner();
        let fail = |msg: String| Some(ValidationError::cross_step(&owner.step, &owner.field, msg));
        let owned = string_items(state, owner);

        match rule {
            CrossStepRule::Subset { of, .. } => {
                let allowed = string_items(state, of);
                let missing: Vec<_> = owned.iter().filter(|v| !allowed.contains(v)).cloned().collect();
                if missing.is_empty() {
                    None
                } else {
                    fail(format!("{} must come from {}", missing.join(", "), of))
                }
            }
            CrossStepRule::Disjoint { other, .. } => {
                let theirs = string_items(state, other);
                let shared: Vec<_> = owned.iter().filter(|v| theirs.contains(v)).cloned().collect();
                if shared.is_empty() {
                    None
                } else {
                    fail(format!("{} already chosen in {}", shared.join(", "), other))
                }
            }
            CrossStepRule::MaxItemsFrom { limit, .. } => {
                match state.field(&limit.step, &limit.field).and_then(|v| v.as_i64()) {
                    Some(max) if owned.len() as i64 <= max => None,
                    Some(max) => fail(format!(
                        "has {} item(s) but {} allows at most {}",
                        owned.len(),
                        limit,
                        max
                    )),
                    None => fail(format!("{} has no numeric limit", limit)),
                }
            }
            CrossStepRule::CatalogFilter {
                category,
                filter_key,
                filter_from,
                ..
            } => {
                let Some(filter_value) = state
                    .field(&filter_from.step, &filter_from.field)
                    .and_then(|v| v.as_str())
                else {
                    return fail(format!("{} has no value to filter by", filter_from));
                };
                let mut filters = Filters::new();
                filters.insert(filter_key.clone(), filter_value.to_string());
                let options = self.catalog.lookup(category, &filters);
                let foreign: Vec<_> = owned
                    .iter()
                    .filter(|v| !options.iter().any(|o| &o.name == *v))
                    .cloned()
                    .collect();
                if foreign.is_empty() {
                    None
                } else {
                    fail(format!(
                        "{} not available for {} {}",
                        foreign.join(", "),
                        filter_key,
                        filter_value
                    ))
                }
            }
        }
    }
}

fn present<'b>(bundle: &'b StepBundle, field: &str) -> Option<&'b Value> {
    bundle.get(field).filter(|v| !v.is_null())
}

/// Items of a list (or a lone scalar) as sorted strings.
pub(crate) fn sorted_items(value: &Value) -> Vec<String> {
    let mut items: Vec<String> = match value {
        Value::Array(items) => items.iter().map(item_text).collect(),
        Value::Null => Vec::new(),
        other => vec![item_text(other)],
    };
    items.sort();
    items
}

fn item_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A field's value as a list of strings; a scalar counts as one item.
fn string_items(state: &WorkflowState, r: &FieldRef) -> Vec<String> {
    match state.field(&r.step, &r.field) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::catalog::StaticCatalog;
    use serde_json::json;

    fn fixture() -> (WorkflowSchema, StaticCatalog) {
        let schema = WorkflowSchema::from_yaml(
            r#"
name: "spells"
steps:
  - id: class
    fields:
      - name: class_name
        kind: { type: choice, options: [Wizard, Cleric] }
  - id: spellbook
    depends_on: [class]
    fields:
      - name: spells
        kind:
          type: list
          item: { type: catalog, category: spell }
          min_items: 2
          max_items: 2
          unique: true
  - id: prepared
    depends_on: [spellbook]
    fields:
      - name: spells
        kind: { type: list, item: { type: text }, min_items: 1 }
      - name: note
        required: false
        kind: { type: text, max_len: 10 }
  - id: portrait
    skippable: true
    fields:
      - name: description
        kind: { type: text }
cross_checks:
  - rule: subset
    owner: prepared.spells
    of: spellbook.spells
  - rule: catalog_filter
    owner: spellbook.spells
    category: spell
    filter_key: class
    filter_from: class.class_name
"#,
        )
        .unwrap();
        let catalog = StaticCatalog::from_yaml(
            r#"
spell:
  - name: Magic Missile
    tags: { class: [wizard] }
  - name: Shield
    tags: { class: [wizard] }
  - name: Bless
    tags: { class: [cleric] }
"#,
        )
        .unwrap();
        (schema, catalog)
    }

    fn bundle(value: Value) -> StepBundle {
        value.as_object().cloned().unwrap()
    }

    fn complete(state: &mut WorkflowState, step: &str, value: Value) {
        state.fields.insert(step.to_string(), bundle(value));
        state.completed_steps.push(step.to_string());
    }

    #[test]
    fn test_validate_field_kinds() {
        let (schema, catalog) = fixture();
        let v = Validator::new(&schema, &catalog);

        assert!(v.validate_field("class", "class_name", &json!("Wizard")).is_empty());
        assert_eq!(v.validate_field("class", "class_name", &json!("Bard")).len(), 1);
        assert!(v
            .validate_field("spellbook", "spells", &json!(["Magic Missile", "Shield"]))
            .is_empty());

        let errors = v.validate_field("spellbook", "spells", &json!(["Shield", "Shield", "Wish"]));
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("3 item(s)")));
        assert!(messages.iter().any(|m| m.contains("more than once")));
        assert!(messages.iter().any(|m| m.contains("'Wish'")));

        assert_eq!(v.validate_field("class", "nope", &json!(1))[0].message, "unknown field");
    }

    #[test]
    fn test_step_completeness_ignores_optional_fields() {
        let (schema, catalog) = fixture();
        let v = Validator::new(&schema, &catalog);
        let mut state = WorkflowState::new();
        state
            .fields
            .insert("prepared".into(), bundle(json!({"spells": ["Shield"]})));
        assert!(v.is_step_complete(&state, "prepared"));

        state.fields.insert(
            "prepared".into(),
            bundle(json!({"spells": ["Shield"], "note": "far too long a note"})),
        );
        assert!(!v.is_step_complete(&state, "prepared"));
        assert!(!v.is_step_complete(&state, "spellbook"));
    }

    #[test]
    fn test_cross_step_rules_fire_only_between_completed_steps() {
        let (schema, catalog) = fixture();
        let v = Validator::new(&schema, &catalog);
        let mut state = WorkflowState::new();
        complete(&mut state, "class", json!({"class_name": "Wizard"}));
        complete(&mut state, "spellbook", json!({"spells": ["Magic Missile", "Shield"]}));
        state
            .fields
            .insert("prepared".into(), bundle(json!({"spells": ["Bless"]})));
        assert!(v.validate_cross_step(&state).is_empty());

        state.completed_steps.push("prepared".into());
        let errors = v.validate_cross_step(&state);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].reference(), "prepared.spells");

        state.fields.insert("class".into(), bundle(json!({"class_name": "Cleric"})));
        let errors = v.validate_cross_step(&state);
        assert!(errors.iter().any(|e| e.step == "spellbook"));
    }

    #[test]
    fn test_validate_complete_allows_untouched_skippable_step() {
        let (schema, catalog) = fixture();
        let v = Validator::new(&schema, &catalog);
        let mut state = WorkflowState::new();
        assert!(!v.validate_complete(&state).valid);

        complete(&mut state, "class", json!({"class_name": "Wizard"}));
        complete(&mut state, "spellbook", json!({"spells": ["Magic Missile", "Shield"]}));
        complete(&mut state, "prepared", json!({"spells": ["Shield"]}));
        let report = v.validate_complete(&state);
        assert!(report.valid, "{:?}", report.errors);
    }

    fn background_fixture() -> (WorkflowSchema, StaticCatalog) {
        let schema = WorkflowSchema::from_yaml(
            r#"
name: "backgrounds"
steps:
  - id: background
    fields:
      - name: background
        kind: { type: catalog, category: background }
      - name: skills
        kind: { type: list, item: { type: text }, min_items: 2, max_items: 2 }
      - name: plus_two
        kind: { type: choice, options: [strength, constitution, intelligence, wisdom] }
      - name: plus_one
        kind: { type: choice, options: [strength, constitution, intelligence, wisdom] }
    rules:
      - rule: distinct
        fields: [plus_two, plus_one]
      - rule: tagged_by
        fields: [plus_two, plus_one]
        category: background
        option_field: background
        tag: ability
      - rule: granted_by
        field: skills
        category: background
        option_field: background
        attribute: skills
"#,
        )
        .unwrap();
        let catalog = StaticCatalog::from_yaml(
            r#"
background:
  - name: Sage
    tags: { ability: [constitution, intelligence, wisdom] }
    attributes: { skills: [Arcana, History] }
"#,
        )
        .unwrap();
        (schema, catalog)
    }

    fn background_errors(answer: Value) -> Vec<String> {
        let (schema, catalog) = background_fixture();
        let v = Validator::new(&schema, &catalog);
        let step = schema.step("background").unwrap();
        v.validate_bundle(step, &bundle(answer))
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn test_bonus_abilities_must_differ() {
        let errors = background_errors(json!({
            "background": "Sage",
            "skills": ["History", "Arcana"],
            "plus_two": "intelligence",
            "plus_one": "intelligence",
        }));
        assert_eq!(errors, vec!["background.plus_one: must differ from plus_two"]);
    }

    #[test]
    fn test_bonus_abilities_come_from_the_background() {
        let errors = background_errors(json!({
            "background": "Sage",
            "skills": ["Arcana", "History"],
            "plus_two": "strength",
            "plus_one": "wisdom",
        }));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("background.plus_two: 'strength' is not offered by Sage"));
    }

    #[test]
    fn test_background_skills_are_granted() {
        let errors = background_errors(json!({
            "background": "Sage",
            "skills": ["Stealth", "Athletics"],
            "plus_two": "intelligence",
            "plus_one": "constitution",
        }));
        assert_eq!(errors, vec!["background.skills: Sage grants Arcana, History"]);

        let (schema, catalog) = background_fixture();
        let v = Validator::new(&schema, &catalog);
        let step = schema.step("background").unwrap();
        let granted = v.granted_values(step, &bundle(json!({"background": "sage"})));
        assert_eq!(granted.get("skills"), Some(&json!(["Arcana", "History"])));
        // Rules over unset fields are not evaluated.
        assert!(v.validate_step_rules(step, &bundle(json!({"plus_two": "strength"}))).is_empty());
    }
}
