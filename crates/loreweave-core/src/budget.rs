//! Token ceilings per lorebook.
//!
//! A ceiling of 0 means "no lorebook-specific limit": the host's own global
//! world-info budget is the only constraint left for that lorebook.

use loreweave_config::{BudgetConfig, BudgetMode};
use serde::{Deserialize, Serialize};

use crate::resolve::ResolvedConfig;

/// Context-wide budget parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBudgetContext {
    /// Model context size in tokens.
    pub max_context_tokens: u32,
    /// Share of the context reserved for world info, in percent.
    pub global_budget_percent: u32,
    /// Hard cap on the global budget (0 = uncapped).
    pub global_budget_cap: u32,
}

impl Default for GlobalBudgetContext {
    fn default() -> Self {
        Self {
            max_context_tokens: 8192,
            global_budget_percent: 25,
            global_budget_cap: 0,
        }
    }
}

impl From<&BudgetConfig> for GlobalBudgetContext {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            max_context_tokens: config.max_context_tokens,
            global_budget_percent: config.global_budget_percent,
            global_budget_cap: config.global_budget_cap,
        }
    }
}

impl GlobalBudgetContext {
    /// The global world-info budget in tokens, after applying the cap.
    pub fn global_budget(&self) -> u32 {
        let budget = (f64::from(self.max_context_tokens) * f64::from(self.global_budget_percent)
            / 100.0)
            .round() as u32;
        if self.global_budget_cap > 0 {
            budget.min(self.global_budget_cap)
        } else {
            budget
        }
    }
}

/// Compute one lorebook's token ceiling. Invalid budget values yield 0.
pub fn allocate(resolved: &ResolvedConfig, global: &GlobalBudgetContext) -> u32 {
    let value = resolved.budget_value;
    match resolved.budget_mode {
        BudgetMode::Default => 0,
        BudgetMode::PercentOfContext => percent_of(value, global.max_context_tokens),
        BudgetMode::PercentOfGlobalBudget => percent_of(value, global.global_budget()),
        BudgetMode::FixedTokens => {
            if value.is_finite() && value >= 1.0 && value.fract() == 0.0 {
                value as u32
            } else {
                0
            }
        }
    }
}

fn percent_of(percent: f64, total: u32) -> u32 {
    if (1.0..=100.0).contains(&percent) {
        (percent / 100.0 * f64::from(total)).floor() as u32
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: BudgetMode, value: f64) -> ResolvedConfig {
        ResolvedConfig {
            budget_mode: mode,
            budget_value: value,
            ..ResolvedConfig::default()
        }
    }

    fn context(max: u32) -> GlobalBudgetContext {
        GlobalBudgetContext {
            max_context_tokens: max,
            ..GlobalBudgetContext::default()
        }
    }

    #[test]
    fn test_global_budget_rounding_and_cap() {
        let mut ctx = context(8191);
        // 8191 * 25% = 2047.75
        assert_eq!(ctx.global_budget(), 2048);
        ctx.global_budget_cap = 1500;
        assert_eq!(ctx.global_budget(), 1500);
        ctx.global_budget_cap = 5000;
        assert_eq!(ctx.global_budget(), 2048);
    }

    #[test]
    fn test_default_mode_has_no_ceiling() {
        assert_eq!(allocate(&config(BudgetMode::Default, 80.0), &context(8000)), 0);
    }

    #[test]
    fn test_percent_of_context() {
        assert_eq!(
            allocate(&config(BudgetMode::PercentOfContext, 25.0), &context(8000)),
            2000
        );
        assert_eq!(
            allocate(&config(BudgetMode::PercentOfContext, 0.0), &context(8000)),
            0
        );
        assert_eq!(
            allocate(&config(BudgetMode::PercentOfContext, 101.0), &context(8000)),
            0
        );
    }

    #[test]
    fn test_percent_of_global_budget() {
        // Global budget = 2000; half of it is 1000.
        assert_eq!(
            allocate(&config(BudgetMode::PercentOfGlobalBudget, 50.0), &context(8000)),
            1000
        );
        let mut capped = context(8000);
        capped.global_budget_cap = 300;
        assert_eq!(
            allocate(&config(BudgetMode::PercentOfGlobalBudget, 50.0), &capped),
            150
        );
    }

    #[test]
    fn test_fixed_tokens() {
        let ctx = context(8000);
        assert_eq!(allocate(&config(BudgetMode::FixedTokens, 10.0), &ctx), 10);
        assert_eq!(allocate(&config(BudgetMode::FixedTokens, 0.0), &ctx), 0);
        assert_eq!(allocate(&config(BudgetMode::FixedTokens, -5.0), &ctx), 0);
        assert_eq!(allocate(&config(BudgetMode::FixedTokens, 2.5), &ctx), 0);
        assert_eq!(allocate(&config(BudgetMode::FixedTokens, f64::INFINITY), &ctx), 0);
    }
}
