//! `stepweave workflow` — Inspect workflow definitions.

use stepweave_core::state::EngineState;
use stepweave_core::workflow::{WorkflowDefinition, WorkflowSchema};

/// Validate a workflow YAML file: parse it and compile the step graph.
pub async fn validate(workflow_file: &str) -> Result<(), String> {
    let definition = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    let schema = WorkflowSchema::compile(&definition).map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", schema.name());
    println!("   Version: {}", schema.version());
    println!("   Steps: {}", schema.steps().len());
    println!("   Cross-step checks: {}", schema.cross_checks().len());
    if let Some(review) = schema.review_unit() {
        println!("   Review unit: {}", review);
    }

    for (i, step) in schema.steps_in_order().enumerate() {
        let deps = if step.depends_on.is_empty() {
            "-".to_string()
        } else {
            step.depends_on.join(", ")
        };
        println!("   {}. {} (after: {})", i + 1, step.id, deps);
    }

    Ok(())
}

/// Table of the active workflow's steps in resolution order.
pub async fn steps(state: &EngineState) -> Result<(), String> {
    let schema = &state.schema;
    println!("Workflow: {} v{}", schema.name(), schema.version());
    println!();
    println!("┌──────────────────┬──────────────────────────┬────────────┬───────────┐");
    println!("│ Step             │ Depends on               │ Fields     │ Flags     │");
    println!("├──────────────────┼──────────────────────────┼────────────┼───────────┤");

    for step in schema.steps_in_order() {
        let mut flags = Vec::new();
        if step.skippable {
            flags.push("skip");
        }
        if step.parallel {
            flags.push("par");
        }
        if step.derived {
            flags.push("auto");
        }
        println!(
            "│ {:<16} │ {:<24} │ {:<10} │ {:<9} │",
            truncate(&step.id, 16),
            truncate(&step.depends_on.join(", "), 24),
            step.fields.len(),
            flags.join(",")
        );
    }

    println!("└──────────────────┴──────────────────────────┴────────────┴───────────┘");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
