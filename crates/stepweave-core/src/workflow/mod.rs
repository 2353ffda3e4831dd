//! Workflow definitions: YAML step graphs compiled into a checked schema.
//!
//! # Architecture
//!
//! ```text
//! workflow.yaml ──► WorkflowDefinition ──► WorkflowSchema ──► Validator / StepResolver
//!                          │
//!                   catalog (inline or file) ──► StaticCatalog
//! ```

pub mod builtin;
pub mod catalog;
pub mod schema;

pub use builtin::{wizard_catalog, wizard_registry, wizard_schema, WizardStep, WIZARD_WORKFLOW};
pub use catalog::{Catalog, CatalogOption, Filters, StaticCatalog};
pub use schema::{CrossStepRule, FieldRef, WorkflowDefinition, WorkflowSchema};
