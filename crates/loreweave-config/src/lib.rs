#![deny(unsafe_code)]

//! Configuration loading and validation for Loreweave.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure, the
//! [`settings`] module with the per-lorebook [`GroupSettings`] record, and the
//! [`tiers`] module for per-tier character assignments.

/// Per-lorebook ordering settings and their lenient decoder.
pub mod settings;
/// Character-to-tier assignments and duplicate detection.
pub mod tiers;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use settings::{BudgetMode, CharacterOverride, GroupSettings, Priority};
pub use tiers::{DuplicateAssignment, TierAssignment};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(
        "characters assigned to multiple priority levels:\n{}",
        tiers::describe_duplicates(.0)
    )]
    DuplicateAssignment(Vec<DuplicateAssignment>),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Global world-info budget parameters.
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Ordering pipeline options.
    #[serde(default)]
    pub ordering: OrderingConfig,

    /// Where lorebook documents are stored.
    #[serde(default)]
    pub store: StoreConfig,

    /// Lorebook settings keyed by lorebook name.
    #[serde(default)]
    pub lorebooks: BTreeMap<String, LorebookConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Global budget parameters shared by every lorebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Model context size in tokens.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,

    /// Share of the context reserved for world info, in percent.
    #[serde(default = "default_global_budget_percent")]
    pub global_budget_percent: u32,

    /// Hard cap on the global budget in tokens (0 = uncapped).
    #[serde(default)]
    pub global_budget_cap: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            global_budget_percent: default_global_budget_percent(),
            global_budget_cap: 0,
        }
    }
}

fn default_max_context_tokens() -> u32 {
    8192
}

fn default_global_budget_percent() -> u32 {
    25
}

/// How the host interleaves world-info entries from different sources.
///
/// Priority ordering only takes effect under [`InsertionStrategy::Evenly`];
/// the other strategies keep the host's own source-by-source order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionStrategy {
    #[default]
    Evenly,
    CharacterFirst,
    GlobalFirst,
}

/// Where the budget is enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSeam {
    /// Dropped entries are removed from the returned list.
    #[default]
    Structural,
    /// Every ordered entry is returned; dropped ones are flagged and their
    /// text is scrubbed from the rendered prompt afterwards.
    Textual,
}

/// Ordering pipeline options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default)]
    pub insertion_strategy: InsertionStrategy,

    #[serde(default)]
    pub seam: BudgetSeam,
}

/// Lorebook document storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one JSON document per lorebook.
    #[serde(default = "default_lorebook_dir")]
    pub lorebook_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lorebook_dir: default_lorebook_dir(),
        }
    }
}

fn default_lorebook_dir() -> String {
    "lorebooks".to_string()
}

/// One lorebook as written in the TOML config.
///
/// Mirrors [`GroupSettings`] and adds `tiers`, the per-tier character
/// assignment form. Tier assignments are merged into `character_overrides`
/// (explicit overrides win for the same character).
///
/// ## TOML Example
///
/// ```toml
/// [lorebooks.Eldoria]
/// priority = 5
/// budget_mode = "fixed_tokens"
/// budget_value = 600
///
/// [[lorebooks.Eldoria.tiers]]
/// priority = 4
/// characters = ["Nova"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LorebookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_adjustment: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_adjustment_group_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_mode: Option<BudgetMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_when_speaking: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub character_overrides: BTreeMap<String, CharacterOverride>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<TierAssignment>,
}

impl LorebookConfig {
    /// Build the stored settings record, folding `tiers` into the overrides.
    pub fn to_group_settings(&self) -> Result<GroupSettings, ConfigError> {
        let mut character_overrides = tiers::collect_overrides(&self.tiers)?;
        character_overrides.extend(
            self.character_overrides
                .iter()
                .map(|(name, o)| (name.clone(), o.clone())),
        );
        Ok(GroupSettings {
            priority: self.priority,
            order_adjustment: self.order_adjustment,
            order_adjustment_group_only: self.order_adjustment_group_only,
            budget_mode: self.budget_mode,
            budget_value: self.budget_value,
            only_when_speaking: self.only_when_speaking,
            character_overrides,
        })
    }
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.budget.max_context_tokens == 0 {
            return Err(ConfigError::Validation(
                "budget.max_context_tokens must be non-zero".to_string(),
            ));
        }
        if !(1..=100).contains(&self.budget.global_budget_percent) {
            return Err(ConfigError::Validation(format!(
                "budget.global_budget_percent must be between 1 and 100, got {}",
                self.budget.global_budget_percent
            )));
        }
        if self.store.lorebook_dir.is_empty() {
            return Err(ConfigError::Validation(
                "store.lorebook_dir must not be empty".to_string(),
            ));
        }

        for (name, lorebook) in &self.lorebooks {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "lorebook names must not be empty".to_string(),
                ));
            }
            lorebook
                .to_group_settings()?
                .validate(&format!("lorebooks.{name}"))?;
        }

        Ok(())
    }

    /// Stored settings for every configured lorebook.
    pub fn group_settings(&self) -> Result<BTreeMap<String, GroupSettings>, ConfigError> {
        self.lorebooks
            .iter()
            .map(|(name, lorebook)| Ok((name.clone(), lorebook.to_group_settings()?)))
            .collect()
    }
}
