use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Target reported by a terminal resolution.
pub const COMPLETE_TARGET: &str = "complete";

/// Static descriptor for one stage of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step identifier (also the id of the worker unit that owns it)
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Steps that must be satisfied before this one is offered
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Fields of the step bundle
    #[serde(default)]
    pub fields: Vec<FieldSpec>,

    /// May be explicitly skipped instead of completed
    #[serde(default)]
    pub skippable: bool,

    /// Mutually independent of the other parallel steps
    #[serde(default)]
    pub parallel: bool,

    /// Reopened whenever the bundle of a (transitive) dependency changes
    #[serde(default)]
    pub derived: bool,

    /// Constraints between fields of this step's own bundle
    #[serde(default)]
    pub rules: Vec<StepRule>,
}

impl StepDefinition {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }
}

/// Constraint between fields of one bundle.
///
/// `option_field` names a sibling `catalog` field; the rule reads the chosen
/// option's tags or attributes. Rules over fields that are not yet set are
/// not evaluated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StepRule {
    /// The listed fields hold pairwise different values
    Distinct { fields: Vec<String> },
    /// Each listed field holds one of the option's `tag` values
    TaggedBy {
        fields: Vec<String>,
        category: String,
        option_field: String,
        tag: String,
    },
    /// `field` holds exactly the option's `attribute`; form units fill it in
    GrantedBy {
        field: String,
        category: String,
        option_field: String,
        attribute: String,
    },
}

impl StepRule {
    pub fn name(&self) -> &'static str {
        match self {
            StepRule::Distinct { .. } => "distinct",
            StepRule::TaggedBy { .. } => "tagged_by",
            StepRule::GrantedBy { .. } => "granted_by",
        }
    }

    /// Every field the rule reads.
    pub fn referenced_fields(&self) -> Vec<&str> {
        match self {
            StepRule::Distinct { fields } => fields.iter().map(String::as_str).collect(),
            StepRule::TaggedBy {
                fields, option_field, ..
            } => fields
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(option_field.as_str()))
                .collect(),
            StepRule::GrantedBy {
                field, option_field, ..
            } => vec![field.as_str(), option_field.as_str()],
        }
    }
}

fn default_true() -> bool {
    true
}

/// A named field inside a step bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    pub kind: FieldKind,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub description: Option<String>,
}

/// Value constraints for a single field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text {
        #[serde(default = "default_min_len")]
        min_len: usize,
        #[serde(default)]
        max_len: Option<usize>,
    },
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Choice {
        options: Vec<String>,
    },
    /// A value that must name an option of a reference-data category
    Catalog {
        category: String,
        #[serde(default)]
        filters: BTreeMap<String, String>,
    },
    List {
        item: Box<FieldKind>,
        #[serde(default)]
        min_items: usize,
        #[serde(default)]
        max_items: Option<usize>,
        #[serde(default)]
        unique: bool,
    },
    Flag,
}

fn default_min_len() -> usize {
    1
}

impl FieldKind {
    /// Short human-readable description used in prompts.
    pub fn describe(&self) -> String {
        match self {
            FieldKind::Text { .. } => "text".to_string(),
            FieldKind::Integer { min, max } => match (min, max) {
                (Some(lo), Some(hi)) => format!("integer {}-{}", lo, hi),
                (Some(lo), None) => format!("integer >= {}", lo),
                (None, Some(hi)) => format!("integer <= {}", hi),
                (None, None) => "integer".to_string(),
            },
            FieldKind::Choice { options } => format!("one of {}", options.join(", ")),
            FieldKind::Catalog { category, .. } => format!("a {}", category.replace('_', " ")),
            FieldKind::List {
                item,
                min_items,
                max_items,
                ..
            } => {
                let count = match max_items {
                    Some(max) if max == min_items => format!("{}", max),
                    Some(max) => format!("{}-{}", min_items, max),
                    None => format!("{}+", min_items),
                };
                format!("{} x {} (comma-separated)", count, item.describe())
            }
            FieldKind::Flag => "yes/no".to_string(),
        }
    }
}

/// Why the resolver picked its target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Edit,
    Review,
    Forward,
    Repair,
    Complete,
}

/// Result of step resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
    pub target: String,
    pub reason: String,
    pub terminal: bool,
    pub kind: ResolutionKind,
    /// Other parallel-eligible steps that are ready as well
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_ready: Vec<String>,
}

impl NextStep {
    pub fn edit(target: &str) -> Self {
        Self {
            target: target.to_string(),
            reason: "explicit edit".to_string(),
            terminal: false,
            kind: ResolutionKind::Edit,
            also_ready: Vec::new(),
        }
    }

    pub fn review(unit: &str) -> Self {
        Self {
            target: unit.to_string(),
            reason: "review requested".to_string(),
            terminal: false,
            kind: ResolutionKind::Review,
            also_ready: Vec::new(),
        }
    }

    pub fn forward(target: &str, reason: impl Into<String>, also_ready: Vec<String>) -> Self {
        Self {
            target: target.to_string(),
            reason: reason.into(),
            terminal: false,
            kind: ResolutionKind::Forward,
            also_ready,
        }
    }

    pub fn repair(target: &str, reason: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            reason: reason.into(),
            terminal: false,
            kind: ResolutionKind::Repair,
            also_ready: Vec::new(),
        }
    }

    pub fn complete() -> Self {
        Self {
            target: COMPLETE_TARGET.to_string(),
            reason: "all required steps complete and valid".to_string(),
            terminal: true,
            kind: ResolutionKind::Complete,
            also_ready: Vec::new(),
        }
    }
}
