//! Per-tier character assignments.
//!
//! Editors present character overrides as five priority tiers, each with a
//! list of characters and an optional order adjustment. A character may sit
//! in at most one tier; [`collect_overrides`] folds the tiers into the
//! `character_overrides` map and refuses to do so when a character appears
//! twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::settings::{CharacterOverride, MAX_ORDER_ADJUSTMENT, MIN_ORDER_ADJUSTMENT, Priority};

/// One priority tier and the characters assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub priority: i64,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub order_adjustment: i64,
}

impl TierAssignment {
    pub fn new(priority: Priority, characters: &[&str]) -> Self {
        Self {
            priority: priority.into(),
            characters: characters.iter().map(|c| c.to_string()).collect(),
            order_adjustment: 0,
        }
    }

    pub fn with_order_adjustment(mut self, adjustment: i64) -> Self {
        self.order_adjustment = adjustment;
        self
    }
}

/// A character found in more than one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAssignment {
    pub character: String,
    pub priorities: Vec<Priority>,
}

/// Fold tier assignments into a `character_overrides` map.
///
/// Blank character names are ignored. Fails on an invalid tier, an order
/// adjustment outside ±10000, or any character assigned to several tiers.
pub fn collect_overrides(
    tiers: &[TierAssignment],
) -> Result<BTreeMap<String, CharacterOverride>, ConfigError> {
    let mut overrides = BTreeMap::new();
    let mut assignments: BTreeMap<&str, Vec<Priority>> = BTreeMap::new();

    for (i, tier) in tiers.iter().enumerate() {
        let priority = Priority::new(tier.priority).ok_or_else(|| {
            ConfigError::Validation(format!(
                "tiers[{i}].priority must be between 1 and 5, got {}",
                tier.priority
            ))
        })?;
        if !(MIN_ORDER_ADJUSTMENT..=MAX_ORDER_ADJUSTMENT).contains(&tier.order_adjustment) {
            return Err(ConfigError::Validation(format!(
                "tiers[{i}].order_adjustment must be between {MIN_ORDER_ADJUSTMENT} and \
                 {MAX_ORDER_ADJUSTMENT}, got {}",
                tier.order_adjustment
            )));
        }

        for character in tier.characters.iter().map(|c| c.trim()) {
            if character.is_empty() {
                continue;
            }
            assignments.entry(character).or_default().push(priority);
            overrides.insert(
                character.to_string(),
                CharacterOverride {
                    priority: Some(priority.into()),
                    order_adjustment: Some(tier.order_adjustment),
                    ..CharacterOverride::default()
                },
            );
        }
    }

    let duplicates: Vec<DuplicateAssignment> = assignments
        .into_iter()
        .filter(|(_, priorities)| priorities.len() > 1)
        .map(|(character, priorities)| DuplicateAssignment {
            character: character.to_string(),
            priorities,
        })
        .collect();

    if !duplicates.is_empty() {
        return Err(ConfigError::DuplicateAssignment(duplicates));
    }

    Ok(overrides)
}

/// Regroup a `character_overrides` map into tiers, highest first.
///
/// Overrides without a valid priority have no tier and are skipped. Each
/// tier takes its order adjustment from the first character that sets a
/// non-zero one.
pub fn tiers_from_overrides(overrides: &BTreeMap<String, CharacterOverride>) -> Vec<TierAssignment> {
    Priority::ALL
        .iter()
        .filter_map(|&priority| {
            let members: Vec<(&String, &CharacterOverride)> = overrides
                .iter()
                .filter(|(_, o)| o.priority.and_then(Priority::new) == Some(priority))
                .collect();
            if members.is_empty() {
                return None;
            }
            let order_adjustment = members
                .iter()
                .find_map(|(_, o)| o.order_adjustment.filter(|adj| *adj != 0))
                .unwrap_or(0);
            Some(TierAssignment {
                priority: priority.into(),
                characters: members.iter().map(|(name, _)| (*name).clone()).collect(),
                order_adjustment,
            })
        })
        .collect()
}

/// Render duplicates as one bullet line per character.
pub(crate) fn describe_duplicates(duplicates: &[DuplicateAssignment]) -> String {
    duplicates
        .iter()
        .map(|d| {
            let tiers: Vec<String> = d.priorities.iter().map(|p| p.to_string()).collect();
            format!("• {}: assigned to priorities {}", d.character, tiers.join(", "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collect_overrides_simple() {
        let tiers = vec![
            TierAssignment::new(Priority::HIGHEST, &["Nova"]).with_order_adjustment(250),
            TierAssignment::new(Priority::LOW, &["Ash", "  "]),
        ];
        let overrides = collect_overrides(&tiers).unwrap();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides["Nova"].priority, Some(5));
        assert_eq!(overrides["Nova"].order_adjustment, Some(250));
        assert_eq!(overrides["Ash"].priority, Some(2));
    }

    #[test]
    fn test_collect_overrides_rejects_duplicates() {
        let tiers = vec![
            TierAssignment::new(Priority::HIGHEST, &["Nova", "Ash"]),
            TierAssignment::new(Priority::HIGH, &["Nova"]),
        ];
        let err = collect_overrides(&tiers).unwrap_err();
        match &err {
            ConfigError::DuplicateAssignment(dups) => {
                assert_eq!(dups.len(), 1);
                assert_eq!(dups[0].character, "Nova");
                assert_eq!(dups[0].priorities, vec![Priority::HIGHEST, Priority::HIGH]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("Nova: assigned to priorities 5 - Highest, 4 - High"));
    }

    #[test]
    fn test_collect_overrides_rejects_bad_tier() {
        let tiers = vec![TierAssignment {
            priority: 9,
            characters: vec!["Nova".into()],
            order_adjustment: 0,
        }];
        assert!(collect_overrides(&tiers).is_err());
    }

    #[test]
    fn test_tiers_round_trip_through_overrides() {
        let tiers = vec![
            TierAssignment::new(Priority::HIGH, &["Ash", "Nova"]).with_order_adjustment(-40),
            TierAssignment::new(Priority::LOWEST, &["Quill"]),
        ];
        let overrides = collect_overrides(&tiers).unwrap();
        assert_eq!(tiers_from_overrides(&overrides), tiers);
    }

    #[test]
    fn test_tiers_skip_overrides_without_priority() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "Nova".to_string(),
            CharacterOverride {
                order_adjustment: Some(10),
                ..CharacterOverride::default()
            },
        );
        assert!(tiers_from_overrides(&overrides).is_empty());
    }
}
