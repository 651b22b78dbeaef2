//! Settings resolution: stored lorebook settings plus the speaker's override.
//!
//! [`resolve`] starts from hard defaults, overlays the stored
//! [`GroupSettings`] field by field, then overlays the active speaker's
//! [`CharacterOverride`](loreweave_config::CharacterOverride) field by field.
//! Values that are missing or out of range keep whatever the previous layer
//! produced, so malformed settings degrade instead of failing.

use loreweave_config::settings::{MAX_ORDER_ADJUSTMENT, MIN_ORDER_ADJUSTMENT};
use loreweave_config::{BudgetMode, GroupSettings, Priority};
use tracing::debug;

/// Who is speaking in the current turn.
///
/// `active_character` is `None` in single-party conversations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeakingContext {
    pub active_character: Option<String>,
}

impl SpeakingContext {
    /// A single-party conversation: nobody is "drafted".
    pub fn single_party() -> Self {
        Self::default()
    }

    /// A multi-party conversation where `character` has the turn.
    pub fn speaking(character: impl Into<String>) -> Self {
        Self {
            active_character: Some(character.into()),
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active_character.as_deref()
    }

    pub fn clear(&mut self) {
        self.active_character = None;
    }
}

/// Fully resolved, speaker-aware configuration of one lorebook for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub priority: Priority,
    pub order_adjustment: i64,
    pub order_adjustment_group_only: bool,
    pub budget_mode: BudgetMode,
    pub budget_value: f64,
    pub only_when_speaking: bool,
    /// The active speaker has an entry in `character_overrides`.
    pub speaker_assigned: bool,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            priority: Priority::NORMAL,
            order_adjustment: 0,
            order_adjustment_group_only: false,
            budget_mode: BudgetMode::Default,
            budget_value: 0.0,
            only_when_speaking: false,
            speaker_assigned: false,
        }
    }
}

impl ResolvedConfig {
    /// Whether the `only_when_speaking` gate lets this lorebook through.
    pub fn is_active(&self) -> bool {
        !self.only_when_speaking || self.speaker_assigned
    }
}

/// Resolve one lorebook's configuration for the current speaker.
pub fn resolve(settings: &GroupSettings, speaking: &SpeakingContext) -> ResolvedConfig {
    let mut resolved = ResolvedConfig::default();

    overlay_priority(&mut resolved.priority, settings.priority);
    overlay_adjustment(&mut resolved.order_adjustment, settings.order_adjustment);
    overlay_budget_value(&mut resolved.budget_value, settings.budget_value);
    if let Some(mode) = settings.budget_mode {
        resolved.budget_mode = mode;
    }
    if let Some(group_only) = settings.order_adjustment_group_only {
        resolved.order_adjustment_group_only = group_only;
    }
    if let Some(only_when_speaking) = settings.only_when_speaking {
        resolved.only_when_speaking = only_when_speaking;
    }

    if let Some(speaker) = speaking.active()
        && let Some(o) = settings.character_overrides.get(speaker)
    {
        resolved.speaker_assigned = true;
        overlay_priority(&mut resolved.priority, o.priority);
        overlay_adjustment(&mut resolved.order_adjustment, o.order_adjustment);
        overlay_budget_value(&mut resolved.budget_value, o.budget_value);
        if let Some(mode) = o.budget_mode {
            resolved.budget_mode = mode;
        }
    }

    if resolved.order_adjustment_group_only && speaking.active().is_none() {
        resolved.order_adjustment = 0;
    }

    resolved
}

fn overlay_priority(target: &mut Priority, raw: Option<i64>) {
    if let Some(raw) = raw {
        match Priority::new(raw) {
            Some(priority) => *target = priority,
            None => debug!(value = raw, "ignoring out-of-range priority"),
        }
    }
}

fn overlay_adjustment(target: &mut i64, raw: Option<i64>) {
    if let Some(raw) = raw {
        if (MIN_ORDER_ADJUSTMENT..=MAX_ORDER_ADJUSTMENT).contains(&raw) {
            *target = raw;
        } else {
            debug!(value = raw, "ignoring out-of-range order adjustment");
        }
    }
}

fn overlay_budget_value(target: &mut f64, raw: Option<f64>) {
    if let Some(raw) = raw.filter(|v| v.is_finite()) {
        *target = raw;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreweave_config::CharacterOverride;
    use pretty_assertions::assert_eq;

    fn with_nova_override(priority: i64, override_priority: i64) -> GroupSettings {
        let mut settings = GroupSettings {
            priority: Some(priority),
            ..GroupSettings::default()
        };
        settings.character_overrides.insert(
            "Nova".into(),
            CharacterOverride {
                priority: Some(override_priority),
                ..CharacterOverride::default()
            },
        );
        settings
    }

    #[test]
    fn test_defaults() {
        let resolved = resolve(&GroupSettings::default(), &SpeakingContext::single_party());
        assert_eq!(resolved, ResolvedConfig::default());
        assert_eq!(resolved.priority, Priority::NORMAL);
        assert_eq!(resolved.order_adjustment, 0);
        assert_eq!(resolved.budget_mode, BudgetMode::Default);
    }

    #[test]
    fn test_override_precedence() {
        let settings = with_nova_override(2, 5);

        let nova = resolve(&settings, &SpeakingContext::speaking("Nova"));
        assert_eq!(nova.priority, Priority::HIGHEST);
        assert!(nova.speaker_assigned);

        let ash = resolve(&settings, &SpeakingContext::speaking("Ash"));
        assert_eq!(ash.priority, Priority::LOW);
        assert!(!ash.speaker_assigned);

        let nobody = resolve(&settings, &SpeakingContext::single_party());
        assert_eq!(nobody.priority, Priority::LOW);
    }

    #[test]
    fn test_override_fields_apply_individually() {
        let mut settings = GroupSettings {
            priority: Some(4),
            order_adjustment: Some(300),
            budget_mode: Some(BudgetMode::FixedTokens),
            budget_value: Some(500.0),
            ..GroupSettings::default()
        };
        settings.character_overrides.insert(
            "Nova".into(),
            CharacterOverride {
                budget_value: Some(120.0),
                ..CharacterOverride::default()
            },
        );

        let resolved = resolve(&settings, &SpeakingContext::speaking("Nova"));
        assert_eq!(resolved.priority, Priority::HIGH);
        assert_eq!(resolved.order_adjustment, 300);
        assert_eq!(resolved.budget_mode, BudgetMode::FixedTokens);
        assert_eq!(resolved.budget_value, 120.0);
    }

    #[test]
    fn test_invalid_fields_fall_back() {
        let mut settings = GroupSettings {
            priority: Some(9),
            order_adjustment: Some(-20_000),
            budget_value: Some(f64::NAN),
            ..GroupSettings::default()
        };
        settings.character_overrides.insert(
            "Nova".into(),
            CharacterOverride {
                priority: Some(0),
                ..CharacterOverride::default()
            },
        );

        let resolved = resolve(&settings, &SpeakingContext::speaking("Nova"));
        assert_eq!(resolved.priority, Priority::NORMAL);
        assert_eq!(resolved.order_adjustment, 0);
        assert_eq!(resolved.budget_value, 0.0);
        assert!(resolved.speaker_assigned);
    }

    #[test]
    fn test_group_only_adjustment() {
        let settings = GroupSettings {
            order_adjustment: Some(750),
            order_adjustment_group_only: Some(true),
            ..GroupSettings::default()
        };

        let single = resolve(&settings, &SpeakingContext::single_party());
        assert_eq!(single.order_adjustment, 0);

        let group = resolve(&settings, &SpeakingContext::speaking("Ash"));
        assert_eq!(group.order_adjustment, 750);
    }

    #[test]
    fn test_only_when_speaking_gate() {
        let mut settings = with_nova_override(3, 4);
        settings.only_when_speaking = Some(true);

        assert!(!resolve(&settings, &SpeakingContext::single_party()).is_active());
        assert!(!resolve(&settings, &SpeakingContext::speaking("Ash")).is_active());
        assert!(resolve(&settings, &SpeakingContext::speaking("Nova")).is_active());
        assert!(resolve(&GroupSettings::default(), &SpeakingContext::single_party()).is_active());
    }
}
