//! The bundled level 1 wizard character builder.
//!
//! Step layout and catalog ship as YAML resources; this module pairs each
//! step with its worker unit.

use std::str::FromStr;
use std::sync::Arc;

use crate::error::EngineError;
use crate::orchestration::WorkerRegistry;
use crate::units::{DerivedStatsUnit, FormUnit, ReviewUnit, SpellcastingUnit};
use crate::workflow::catalog::StaticCatalog;
use crate::workflow::schema::{WorkflowDefinition, WorkflowSchema};

const WIZARD_YAML: &str = include_str!("../../resources/wizard.yaml");
const WIZARD_CATALOG_YAML: &str = include_str!("../../resources/wizard_catalog.yaml");

pub const WIZARD_WORKFLOW: &str = "wizard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WizardStep {
    Race,
    AbilityScores,
    Class,
    Background,
    Spellcasting,
    Spellbook,
    Cantrips,
    PreparedSpells,
    Portrait,
    DerivedStats,
    Review,
}

impl WizardStep {
    pub const ALL: [WizardStep; 11] = [
        Self::Race,
        Self::AbilityScores,
        Self::Class,
        Self::Background,
        Self::Spellcasting,
        Self::Spellbook,
        Self::Cantrips,
        Self::PreparedSpells,
        Self::Portrait,
        Self::DerivedStats,
        Self::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Race => "race",
            Self::AbilityScores => "ability_scores",
            Self::Class => "class",
            Self::Background => "background",
            Self::Spellcasting => "spellcasting",
            Self::Spellbook => "spellbook",
            Self::Cantrips => "cantrips",
            Self::PreparedSpells => "prepared_spells",
            Self::Portrait => "portrait",
            Self::DerivedStats => "derived_stats",
            Self::Review => "review",
        }
    }
}

impl FromStr for WizardStep {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| EngineError::NotFound(format!("wizard step '{}'", s)))
    }
}

pub fn wizard_definition() -> Result<WorkflowDefinition, EngineError> {
    WorkflowDefinition::from_yaml(WIZARD_YAML)
}

pub fn wizard_schema() -> Result<WorkflowSchema, EngineError> {
    WorkflowSchema::compile(&wizard_definition()?)
}

pub fn wizard_catalog() -> Result<StaticCatalog, EngineError> {
    StaticCatalog::from_yaml(WIZARD_CATALOG_YAML)
}

/// Registry for the wizard workflow: computed units for the derived steps,
/// form units for everything the player answers.
pub fn wizard_registry(schema: &WorkflowSchema) -> Result<WorkerRegistry, EngineError> {
    let mut builder = WorkerRegistry::builder();
    for step in WizardStep::ALL {
        builder = match step {
            WizardStep::Spellcasting => builder.register(Arc::new(SpellcastingUnit)),
            WizardStep::DerivedStats => builder.register(Arc::new(DerivedStatsUnit)),
            WizardStep::Review => builder.register(Arc::new(ReviewUnit::new(step.as_str()))),
            WizardStep::Race
            | WizardStep::AbilityScores
            | WizardStep::Class
            | WizardStep::Background
            | WizardStep::Spellbook
            | WizardStep::Cantrips
            | WizardStep::PreparedSpells
            | WizardStep::Portrait => builder.register(Arc::new(FormUnit::new(step.as_str()))),
        };
    }
    builder.build(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::catalog::{Catalog, Filters};

    #[test]
    fn test_bundled_workflow_compiles() {
        let schema = wizard_schema().unwrap();
        assert_eq!(schema.name(), WIZARD_WORKFLOW);
        assert_eq!(schema.review_unit(), Some("review"));

        let order: Vec<&str> = schema.steps_in_order().map(|s| s.id.as_str()).collect();
        assert_eq!(order.first(), Some(&"race"));
        assert_eq!(
            &order[4..],
            &["spellcasting", "spellbook", "cantrips", "prepared_spells", "derived_stats", "portrait"]
        );
        assert!(schema.steps_in_order().all(|s| !s.parallel));
        assert!(schema.step("portrait").unwrap().skippable);
        let rules: Vec<&str> = schema.step("background").unwrap().rules.iter().map(|r| r.name()).collect();
        assert_eq!(rules, vec!["distinct", "tagged_by", "granted_by"]);
    }

    #[test]
    fn test_step_enum_covers_every_unit() {
        let schema = wizard_schema().unwrap();
        let mut ids: Vec<&str> = schema.unit_ids();
        ids.sort();
        let mut ours: Vec<&str> = WizardStep::ALL.iter().map(|s| s.as_str()).collect();
        ours.sort();
        assert_eq!(ids, ours);
        assert_eq!("cantrips".parse::<WizardStep>().unwrap(), WizardStep::Cantrips);
        assert!("nope".parse::<WizardStep>().is_err());
    }

    #[test]
    fn test_registry_builds() {
        let schema = wizard_schema().unwrap();
        let registry = wizard_registry(&schema).unwrap();
        assert_eq!(registry.unit_ids().len(), WizardStep::ALL.len());
        assert!(!registry.get("spellcasting").unwrap().needs_input());
        assert!(registry.get("race").unwrap().needs_input());
    }

    #[test]
    fn test_catalog_class_filter() {
        let catalog = wizard_catalog().unwrap();
        let mut filters = Filters::new();
        filters.insert("class".into(), "Wizard".into());
        let skills = catalog.lookup("skill", &filters);
        assert_eq!(skills.len(), 6);
        assert!(catalog.find("race", "goliath").unwrap().attribute_i64("speed") == Some(35));
        assert!(catalog
            .lookup("cantrip", &filters)
            .iter()
            .all(|c| c.name != "Sacred Flame"));
    }
}
