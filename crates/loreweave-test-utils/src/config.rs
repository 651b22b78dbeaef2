//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use loreweave_config::{AppConfig, BudgetSeam, InsertionStrategy, LorebookConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .max_context_tokens(8000)
///     .seam(BudgetSeam::Textual)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn max_context_tokens(mut self, tokens: u32) -> Self {
        self.config.budget.max_context_tokens = tokens;
        self
    }

    pub fn global_budget_percent(mut self, percent: u32) -> Self {
        self.config.budget.global_budget_percent = percent;
        self
    }

    pub fn global_budget_cap(mut self, cap: u32) -> Self {
        self.config.budget.global_budget_cap = cap;
        self
    }

    pub fn insertion_strategy(mut self, strategy: InsertionStrategy) -> Self {
        self.config.ordering.insertion_strategy = strategy;
        self
    }

    pub fn seam(mut self, seam: BudgetSeam) -> Self {
        self.config.ordering.seam = seam;
        self
    }

    pub fn lorebook_dir(mut self, dir: &str) -> Self {
        self.config.store.lorebook_dir = dir.to_string();
        self
    }

    pub fn lorebook(mut self, name: &str, lorebook: LorebookConfig) -> Self {
        self.config.lorebooks.insert(name.to_string(), lorebook);
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
