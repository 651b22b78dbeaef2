//! Per-lorebook ordering settings.
//!
//! [`GroupSettings`] is the stored form of one lorebook's configuration. Every
//! field is optional: a missing field means "use the default", and the
//! resolver in `loreweave-core` treats out-of-range values the same way.
//!
//! Settings written by older tools (or by hand) may contain wrongly typed
//! values. [`GroupSettings::from_json_lenient`] decodes such documents field
//! by field, dropping anything it cannot interpret instead of failing the
//! whole record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ConfigError;

/// Lowest accepted order adjustment.
pub const MIN_ORDER_ADJUSTMENT: i64 = -10_000;

/// Highest accepted order adjustment.
pub const MAX_ORDER_ADJUSTMENT: i64 = 10_000;

/// Coarse ordering tier of a lorebook, 1 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

impl Priority {
    pub const LOWEST: Self = Self(1);
    pub const LOW: Self = Self(2);
    pub const NORMAL: Self = Self(3);
    pub const HIGH: Self = Self(4);
    pub const HIGHEST: Self = Self(5);

    /// All tiers, highest first.
    pub const ALL: [Self; 5] = [
        Self::HIGHEST,
        Self::HIGH,
        Self::NORMAL,
        Self::LOW,
        Self::LOWEST,
    ];

    /// Build a priority from a raw value, or `None` if it is outside 1..=5.
    pub fn new(value: i64) -> Option<Self> {
        if (1..=5).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// The numeric tier.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Human-readable tier name.
    pub fn name(self) -> &'static str {
        match self.0 {
            5 => "Highest",
            4 => "High",
            3 => "Normal",
            2 => "Low",
            _ => "Lowest",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.0, self.name())
    }
}

impl TryFrom<i64> for Priority {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("priority must be between 1 and 5, got {value}"))
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        i64::from(priority.0)
    }
}

/// Policy for deriving a lorebook's token ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// No lorebook-specific ceiling.
    #[default]
    Default,
    /// Percentage of the model's context size.
    PercentOfContext,
    /// Percentage of the global world-info budget.
    PercentOfGlobalBudget,
    /// Absolute number of tokens.
    FixedTokens,
}

impl BudgetMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::PercentOfContext => "percent_of_context",
            Self::PercentOfGlobalBudget => "percent_of_global_budget",
            Self::FixedTokens => "fixed_tokens",
        }
    }
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetMode {
    type Err = ConfigError;

    /// Accepts both `snake_case` and the `camelCase` spelling used by older
    /// lorebook documents.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" => Ok(Self::Default),
            "percent_of_context" | "percentOfContext" => Ok(Self::PercentOfContext),
            "percent_of_global_budget" | "percentOfGlobalBudget" => {
                Ok(Self::PercentOfGlobalBudget)
            }
            "fixed_tokens" | "fixedTokens" => Ok(Self::FixedTokens),
            other => Err(ConfigError::Validation(format!(
                "unknown budget mode {other:?}"
            ))),
        }
    }
}

/// Settings that replace the lorebook's own while one character is speaking.
///
/// Each present field overrides the matching lorebook field individually.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_adjustment: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_mode: Option<BudgetMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_value: Option<f64>,
}

impl CharacterOverride {
    /// An override that only changes the priority tier.
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority.into()),
            ..Self::default()
        }
    }

    fn from_json_lenient(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            priority: field(obj, "priority", "priority").and_then(as_integer),
            order_adjustment: field(obj, "order_adjustment", "orderAdjustment")
                .and_then(as_integer),
            budget_mode: field(obj, "budget_mode", "budgetMode").and_then(as_budget_mode),
            budget_value: field(obj, "budget_value", "budgetValue").and_then(as_number),
        })
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if let Some(priority) = self.priority {
            validate_priority(priority, path)?;
        }
        if let Some(adjustment) = self.order_adjustment {
            validate_adjustment(adjustment, path)?;
        }
        if let (Some(mode), Some(value)) = (self.budget_mode, self.budget_value) {
            validate_budget(mode, value, path)?;
        }
        Ok(())
    }
}

/// Stored ordering settings of one lorebook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// Priority tier; `None` means the default tier (3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_adjustment: Option<i64>,
    /// Apply `order_adjustment` only in multi-party conversations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_adjustment_group_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_mode: Option<BudgetMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_value: Option<f64>,
    /// Activate only while a character listed in `character_overrides` speaks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_when_speaking: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub character_overrides: BTreeMap<String, CharacterOverride>,
}

impl GroupSettings {
    /// Decode a stored settings object without ever failing.
    ///
    /// Fields are looked up under their `snake_case` and `camelCase` names.
    /// A field with an unusable type is treated as absent. A value that is not
    /// an object yields the defaults. Override entries keep their character
    /// key even when the override itself is unusable.
    pub fn from_json_lenient(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };

        let character_overrides = field(obj, "character_overrides", "characterOverrides")
            .and_then(Value::as_object)
            .map(|overrides| {
                overrides
                    .iter()
                    .map(|(name, raw)| {
                        let o = CharacterOverride::from_json_lenient(raw).unwrap_or_default();
                        (name.clone(), o)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            priority: field(obj, "priority", "priority").and_then(as_integer),
            order_adjustment: field(obj, "order_adjustment", "orderAdjustment")
                .and_then(as_integer),
            order_adjustment_group_only: field(
                obj,
                "order_adjustment_group_only",
                "orderAdjustmentGroupOnly",
            )
            .and_then(Value::as_bool),
            budget_mode: field(obj, "budget_mode", "budgetMode").and_then(as_budget_mode),
            budget_value: field(obj, "budget_value", "budgetValue").and_then(as_number),
            only_when_speaking: field(obj, "only_when_speaking", "onlyWhenSpeaking")
                .and_then(Value::as_bool),
            character_overrides,
        }
    }

    /// Fill every unset scalar with its default, keeping `priority` unset when
    /// it was unset. Used before persisting so stored documents are complete.
    pub fn with_defaults(mut self) -> Self {
        self.order_adjustment.get_or_insert(0);
        self.order_adjustment_group_only.get_or_insert(false);
        self.budget_mode.get_or_insert(BudgetMode::Default);
        self.budget_value.get_or_insert(0.0);
        self.only_when_speaking.get_or_insert(false);
        self
    }

    /// Whether the lorebook asks for a tier other than the default one.
    pub fn has_custom_priority(&self) -> bool {
        self.priority
            .and_then(Priority::new)
            .is_some_and(|p| p != Priority::NORMAL)
    }

    /// Strict edit-time validation. `path` prefixes error messages.
    pub fn validate(&self, path: &str) -> Result<(), ConfigError> {
        if let Some(priority) = self.priority {
            validate_priority(priority, path)?;
        }
        if let Some(adjustment) = self.order_adjustment {
            validate_adjustment(adjustment, path)?;
        }
        if let (Some(mode), Some(value)) = (self.budget_mode, self.budget_value) {
            validate_budget(mode, value, path)?;
        }
        for (name, o) in &self.character_overrides {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{path}.character_overrides contains an empty character name"
                )));
            }
            o.validate(&format!("{path}.character_overrides.{name}"))?;
        }
        Ok(())
    }
}

fn validate_priority(priority: i64, path: &str) -> Result<(), ConfigError> {
    Priority::try_from(priority)
        .map(|_| ())
        .map_err(|msg| ConfigError::Validation(format!("{path}.priority: {msg}")))
}

fn validate_adjustment(adjustment: i64, path: &str) -> Result<(), ConfigError> {
    if !(MIN_ORDER_ADJUSTMENT..=MAX_ORDER_ADJUSTMENT).contains(&adjustment) {
        return Err(ConfigError::Validation(format!(
            "{path}.order_adjustment must be between {MIN_ORDER_ADJUSTMENT} and \
             {MAX_ORDER_ADJUSTMENT}, got {adjustment}"
        )));
    }
    Ok(())
}

fn validate_budget(mode: BudgetMode, value: f64, path: &str) -> Result<(), ConfigError> {
    let ok = match mode {
        BudgetMode::Default => true,
        BudgetMode::PercentOfContext | BudgetMode::PercentOfGlobalBudget => {
            (1.0..=100.0).contains(&value)
        }
        BudgetMode::FixedTokens => value.is_finite() && value >= 1.0 && value.fract() == 0.0,
    };
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{path}.budget_value {value} is not valid for budget mode {mode}"
        )))
    }
}

fn field<'a>(obj: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    obj.get(snake).or_else(|| obj.get(camel))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

fn as_budget_mode(value: &Value) -> Option<BudgetMode> {
    value.as_str().and_then(|s| s.parse().ok())
}
