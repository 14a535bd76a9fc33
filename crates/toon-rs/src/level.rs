//! Optimization levels: which fragment kinds may be served from cache.

use crate::fragment::FragmentKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How aggressively a session reuses fragments.
///
/// | Level | Cached kinds |
/// |-------|--------------|
/// | `Conservative` | none (every fragment resent, savings measured as zero) |
/// | `Balanced` | system prompt |
/// | `Aggressive` | system prompt and instruction templates |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Conservative,
    Balanced,
    #[default]
    Aggressive,
}

impl OptimizationLevel {
    /// Fragment kinds eligible for caching at this level.
    pub fn eligible_kinds(self) -> &'static [FragmentKind] {
        match self {
            OptimizationLevel::Conservative => &[],
            OptimizationLevel::Balanced => &[FragmentKind::SystemPrompt],
            OptimizationLevel::Aggressive => &[
                FragmentKind::SystemPrompt,
                FragmentKind::InstructionTemplate,
            ],
        }
    }

    pub fn is_eligible(self, kind: FragmentKind) -> bool {
        self.eligible_kinds().contains(&kind)
    }
}

impl fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationLevel::Conservative => write!(f, "conservative"),
            OptimizationLevel::Balanced => write!(f, "balanced"),
            OptimizationLevel::Aggressive => write!(f, "aggressive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_aggressive() {
        assert_eq!(OptimizationLevel::default(), OptimizationLevel::Aggressive);
    }

    #[test]
    fn eligibility_widens_with_level() {
        use FragmentKind::*;
        assert!(!OptimizationLevel::Conservative.is_eligible(SystemPrompt));
        assert!(!OptimizationLevel::Conservative.is_eligible(InstructionTemplate));
        assert!(OptimizationLevel::Balanced.is_eligible(SystemPrompt));
        assert!(!OptimizationLevel::Balanced.is_eligible(InstructionTemplate));
        assert!(OptimizationLevel::Aggressive.is_eligible(SystemPrompt));
        assert!(OptimizationLevel::Aggressive.is_eligible(InstructionTemplate));
    }

    #[test]
    fn display_matches_cli_names() {
        use clap::ValueEnum;
        for level in OptimizationLevel::value_variants() {
            let name = level.to_possible_value().unwrap();
            assert_eq!(name.get_name(), level.to_string());
        }
    }
}
