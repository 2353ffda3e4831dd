//! Worker units shipped with the engine.
//!
//! - [`FormUnit`]: generic handler for any step, fed `key=value` answers
//! - [`ReviewUnit`]: summary screen reached in REVIEW mode
//! - [`SpellcastingUnit`], [`DerivedStatsUnit`]: computed steps of the
//!   built-in wizard workflow

pub mod computed;
pub mod form;
pub mod review;

pub use computed::{DerivedStatsUnit, SpellcastingUnit};
pub use form::FormUnit;
pub use review::ReviewUnit;

use crate::models::session::UserInput;

/// Control words understood by the interactive units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Skip,
    Review,
    Edit(String),
    Keep,
    Confirm,
    Answer(String),
}

impl Command {
    pub(crate) fn parse(input: &UserInput) -> Self {
        let text = input.as_str().trim();
        let lower = text.to_lowercase();
        match lower.as_str() {
            "skip" => Command::Skip,
            "review" => Command::Review,
            "keep" => Command::Keep,
            "confirm" | "done" => Command::Confirm,
            _ => match lower.strip_prefix("edit ") {
                Some(step) if !step.trim().is_empty() => Command::Edit(step.trim().to_string()),
                _ => Command::Answer(text.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse(&" Skip ".into()), Command::Skip);
        assert_eq!(Command::parse(&"edit race".into()), Command::Edit("race".into()));
        assert_eq!(Command::parse(&"edit ".into()), Command::Answer("edit".into()));
        assert_eq!(
            Command::parse(&"race=Elf".into()),
            Command::Answer("race=Elf".into())
        );
    }
}
