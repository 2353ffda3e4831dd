//! Reference-data lookup boundary.
//!
//! Worker units and the validation engine consult a read-only catalog of
//! already-validated domain options (races, spells, ...). The engine only
//! assumes lookups are deterministic; `StaticCatalog` satisfies that by
//! keeping options in declaration order.
//!
//! ```yaml
//! race:
//!   - name: Elf
//!     attributes: { size: medium, speed: 30, darkvision: 60 }
//! cantrip:
//!   - name: Fire Bolt
//!     tags: { class: [sorcerer, wizard] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Filter map: every `(key, value)` must match one of the option's tags.
pub type Filters = BTreeMap<String, String>;

/// One selectable domain option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogOption {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl CatalogOption {
    pub fn matches(&self, filters: &Filters) -> bool {
        filters.iter().all(|(key, wanted)| {
            self.tags
                .get(key)
                .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case(wanted)))
                .unwrap_or(false)
        })
    }

    pub fn attribute_i64(&self, key: &str) -> Option<i64> {
        self.attributes.get(key).and_then(|v| v.as_i64())
    }
}

/// Read-only reference-data lookup.
pub trait Catalog: Send + Sync {
    fn lookup(&self, category: &str, filters: &Filters) -> Vec<CatalogOption>;

    /// Case-insensitive lookup of a single option by name.
    fn find(&self, category: &str, name: &str) -> Option<CatalogOption> {
        self.lookup(category, &Filters::new())
            .into_iter()
            .find(|o| o.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Catalog backed by an in-memory map, typically loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticCatalog {
    categories: BTreeMap<String, Vec<CatalogOption>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(categories: BTreeMap<String, Vec<CatalogOption>>) -> Self {
        Self { categories }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, EngineError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::InvalidWorkflow(format!("Failed to parse catalog YAML: {}", e)))
    }

    pub fn insert(&mut self, category: &str, option: CatalogOption) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(option);
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(|k| k.as_str())
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains_key(category)
    }
}

impl Catalog for StaticCatalog {
    fn lookup(&self, category: &str, filters: &Filters) -> Vec<CatalogOption> {
        self.categories
            .get(category)
            .map(|options| {
                options
                    .iter()
                    .filter(|o| o.matches(filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticCatalog {
        StaticCatalog::from_yaml(
            r#"
cantrip:
  - name: Fire Bolt
    tags: { class: [sorcerer, wizard] }
  - name: Sacred Flame
    tags: { class: [cleric] }
race:
  - name: Goliath
    attributes: { speed: 35 }
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_with_filters() {
        let catalog = catalog();
        let mut filters = Filters::new();
        filters.insert("class".into(), "Wizard".into());
        let names: Vec<_> = catalog
            .lookup("cantrip", &filters)
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["Fire Bolt"]);
        assert_eq!(catalog.lookup("cantrip", &Filters::new()).len(), 2);
        assert!(catalog.lookup("feat", &Filters::new()).is_empty());
    }

    #[test]
    fn test_find_is_case_insensitive() {
        let catalog = catalog();
        let goliath = catalog.find("race", " goliath ").unwrap();
        assert_eq!(goliath.name, "Goliath");
        assert_eq!(goliath.attribute_i64("speed"), Some(35));
    }
}
