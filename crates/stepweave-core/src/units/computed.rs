//! Computed steps of the built-in wizard workflow.
//!
//! Both units derive their bundle from earlier answers, need no input, and
//! are reopened by the store whenever an upstream bundle changes.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{EngineError, ValidationError};
use crate::models::session::UserInput;
use crate::models::state::{StepBundle, WorkflowMode, WorkflowState};
use crate::orchestration::{HandBack, StepContext, WorkerUnit};
use crate::store::Mutation;
use crate::workflow::catalog::Catalog;

pub const ABILITIES: [&str; 6] = [
    "strength",
    "dexterity",
    "constitution",
    "intelligence",
    "wisdom",
    "charisma",
];

/// Level 1 proficiency bonus.
pub const PROFICIENCY_BONUS: i64 = 2;

/// Ability modifier, rounding down.
pub fn modifier(score: i64) -> i64 {
    (score - 10).div_euclid(2)
}

/// Base score plus the background's +2/+1 bonuses.
pub fn ability_total(state: &WorkflowState, ability: &str) -> Option<i64> {
    let base = state.field("ability_scores", ability)?.as_i64()?;
    let bonus = |field: &str, amount: i64| {
        match state.field("background", field).and_then(|v| v.as_str()) {
            Some(chosen) if chosen == ability => amount,
            _ => 0,
        }
    };
    Some(base + bonus("plus_two", 2) + bonus("plus_one", 1))
}

fn required_total(state: &WorkflowState, step: &str, ability: &str) -> Result<i64, EngineError> {
    ability_total(state, ability).ok_or_else(|| {
        EngineError::Validation(vec![ValidationError::step(
            step,
            format!("ability score '{}' is not set", ability),
        )])
    })
}

fn has_skill(state: &WorkflowState, skill: &str) -> bool {
    ["class", "background"].iter().any(|step| {
        state
            .field(step, "skills")
            .and_then(|v| v.as_array())
            .map(|skills| skills.iter().any(|s| s.as_str() == Some(skill)))
            .unwrap_or(false)
    })
}

/// Write a computed bundle and complete the step.
///
/// When the inputs are missing and the step was opened with `edit`, the
/// session leaves EDIT mode and the unit yields instead of failing.
async fn finish(
    ctx: &mut StepContext,
    step: &str,
    computed: Result<(StepBundle, String), EngineError>,
) -> Result<(), EngineError> {
    match computed {
        Ok((values, summary)) => {
            ctx.write(vec![Mutation::set(step, values), Mutation::complete(step)])
                .await?;
            tracing::debug!("[ComputedUnit] '{}': {}", step, summary);
            ctx.hand_back(HandBack::Completed {
                message: Some(summary),
            })
        }
        Err(EngineError::Validation(errors))
            if ctx.state().mode == WorkflowMode::Edit
                && ctx.state().edit_target.as_deref() == Some(step) =>
        {
            tracing::warn!(
                "[ComputedUnit] Cannot recompute '{}' yet ({} missing input(s))",
                step,
                errors.len()
            );
            ctx.write(vec![Mutation::ExitEdit]).await?;
            ctx.hand_back(HandBack::yielded(format!(
                "'{}' cannot be recomputed until its inputs are set",
                step
            )))
        }
        Err(e) => Err(e),
    }
}

fn to_bundle(values: Value, what: &str) -> Result<StepBundle, EngineError> {
    match values {
        Value::Object(map) => Ok(map),
        _ => Err(EngineError::Serialization(what.to_string())),
    }
}

/// Spell save DC, attack bonus and preparation limit from Intelligence.
pub struct SpellcastingUnit;

pub const SPELLCASTING_STEP: &str = "spellcasting";

impl SpellcastingUnit {
    pub fn compute(state: &WorkflowState) -> Result<(StepBundle, String), EngineError> {
        let int_mod = modifier(required_total(state, SPELLCASTING_STEP, "intelligence")?);
        let save_dc = 8 + PROFICIENCY_BONUS + int_mod;
        let attack_bonus = PROFICIENCY_BONUS + int_mod;
        let max_prepared = (int_mod + 1).max(1);
        let values = to_bundle(
            json!({
                "ability": "intelligence",
                "save_dc": save_dc,
                "attack_bonus": attack_bonus,
                "max_prepared": max_prepared,
                "spell_slots": 2,
            }),
            "spellcasting values",
        )?;
        let summary = format!(
            "Spell save DC {}, spell attack +{}, {} prepared spell(s)",
            save_dc, attack_bonus, max_prepared
        );
        Ok((values, summary))
    }
}

#[async_trait]
impl WorkerUnit for SpellcastingUnit {
    fn unit_id(&self) -> &str {
        SPELLCASTING_STEP
    }

    fn needs_input(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut StepContext, _input: Option<UserInput>) -> Result<(), EngineError> {
        let computed = Self::compute(ctx.state());
        finish(ctx, SPELLCASTING_STEP, computed).await
    }
}

/// Armor class, initiative, hit points and passive perception.
pub struct DerivedStatsUnit;

pub const DERIVED_STATS_STEP: &str = "derived_stats";

impl DerivedStatsUnit {
    fn speed(state: &WorkflowState, catalog: &dyn Catalog) -> i64 {
        state
            .field("race", "race")
            .and_then(|v| v.as_str())
            .and_then(|race| catalog.find("race", race))
            .and_then(|race| race.attribute_i64("speed"))
            .unwrap_or(30)
    }

    pub fn compute(
        state: &WorkflowState,
        catalog: &dyn Catalog,
    ) -> Result<(StepBundle, String), EngineError> {
        let dex_mod = modifier(required_total(state, DERIVED_STATS_STEP, "dexterity")?);
        let con_mod = modifier(required_total(state, DERIVED_STATS_STEP, "constitution")?);
        let wis_mod = modifier(required_total(state, DERIVED_STATS_STEP, "wisdom")?);
        let perception = if has_skill(state, "Perception") {
            wis_mod + PROFICIENCY_BONUS
        } else {
            wis_mod
        };
        let speed = Self::speed(state, catalog);

        let armor_class = 10 + dex_mod;
        let hit_points = (6 + con_mod).max(1);
        let values = to_bundle(
            json!({
                "armor_class": armor_class,
                "mage_armor_class": 13 + dex_mod,
                "initiative": dex_mod,
                "hit_points": hit_points,
                "passive_perception": 10 + perception,
                "speed": speed,
                "proficiency_bonus": PROFICIENCY_BONUS,
            }),
            "derived stats",
        )?;
        Ok((values, format!("AC {}, HP {}, speed {} ft", armor_class, hit_points, speed)))
    }
}

#[async_trait]
impl WorkerUnit for DerivedStatsUnit {
    fn unit_id(&self) -> &str {
        DERIVED_STATS_STEP
    }

    fn needs_input(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut StepContext, _input: Option<UserInput>) -> Result<(), EngineError> {
        let computed = Self::compute(ctx.state(), ctx.catalog());
        finish(ctx, DERIVED_STATS_STEP, computed).await
    }
}
