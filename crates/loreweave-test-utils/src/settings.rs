//! Lorebook settings and entry fixtures.

use loreweave_config::{BudgetMode, CharacterOverride, GroupSettings, Priority};
use loreweave_core::Entry;

/// Fluent builder for [`GroupSettings`] in tests.
///
/// # Example
///
/// ```ignore
/// let settings = TestSettingsBuilder::new()
///     .priority(Priority::LOW)
///     .override_priority("Nova", Priority::HIGHEST)
///     .build();
/// ```
#[derive(Default)]
pub struct TestSettingsBuilder {
    settings: GroupSettings,
}

impl TestSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.settings.priority = Some(priority.into());
        self
    }

    /// Set a raw priority value, valid or not.
    pub fn raw_priority(mut self, priority: i64) -> Self {
        self.settings.priority = Some(priority);
        self
    }

    pub fn order_adjustment(mut self, adjustment: i64) -> Self {
        self.settings.order_adjustment = Some(adjustment);
        self
    }

    pub fn group_only_adjustment(mut self) -> Self {
        self.settings.order_adjustment_group_only = Some(true);
        self
    }

    pub fn budget(mut self, mode: BudgetMode, value: f64) -> Self {
        self.settings.budget_mode = Some(mode);
        self.settings.budget_value = Some(value);
        self
    }

    pub fn only_when_speaking(mut self) -> Self {
        self.settings.only_when_speaking = Some(true);
        self
    }

    pub fn override_priority(self, character: &str, priority: Priority) -> Self {
        self.character_override(character, CharacterOverride::with_priority(priority))
    }

    pub fn character_override(mut self, character: &str, o: CharacterOverride) -> Self {
        self.settings
            .character_overrides
            .insert(character.to_string(), o);
        self
    }

    pub fn build(self) -> GroupSettings {
        self.settings
    }
}

/// An entry whose content is exactly `tokens` tokens under the heuristic
/// counter (4 bytes per token).
pub fn lore(uid: u64, group: Option<&str>, base_order: i64, tokens: usize) -> Entry {
    let content = format!("{uid:0width$}", width = tokens * 4);
    Entry::new(uid, group, content).with_base_order(base_order)
}
