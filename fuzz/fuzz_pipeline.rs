//! Fuzz target for the ordering and admission pipeline.
//!
//! Run with: cargo +nightly fuzz run fuzz_pipeline
//!
//! Builds lorebook settings and entries from raw bytes and checks that the
//! pipeline never panics and never charges a lorebook past its ceiling.

#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use loreweave_config::{BudgetMode, GroupSettings};
use loreweave_core::{
    Entry, GlobalBudgetContext, HeuristicCounter, SpeakingContext, TurnOptions, process_turn,
};

const GROUPS: [&str; 4] = ["A", "B", "C", "D"];
const MODES: [BudgetMode; 4] = [
    BudgetMode::Default,
    BudgetMode::PercentOfContext,
    BudgetMode::PercentOfGlobalBudget,
    BudgetMode::FixedTokens,
];

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }
    let (header, body) = data.split_at(16);

    // Four bytes per lorebook: priority, adjustment, budget mode, budget value.
    let mut provider = BTreeMap::new();
    for (group, b) in GROUPS.iter().zip(header.chunks_exact(4)) {
        provider.insert(
            group.to_string(),
            GroupSettings {
                priority: Some(i64::from(b[0] % 7)),
                order_adjustment: Some(i64::from(b[1] as i8) * 100),
                budget_mode: Some(MODES[usize::from(b[2] % 4)]),
                budget_value: Some(f64::from(b[3])),
                ..GroupSettings::default()
            },
        );
    }

    // Four bytes per entry: group, base order (2 bytes), content length.
    let entries: Vec<Entry> = body
        .chunks_exact(4)
        .enumerate()
        .map(|(uid, b)| {
            let group = GROUPS.get(usize::from(b[0] % 5)).copied();
            let base = i64::from(i16::from_le_bytes([b[1], b[2]]));
            Entry::new(uid as u64, group, "x".repeat(usize::from(b[3])))
                .with_base_order(base)
        })
        .collect();
    let total = entries.len();

    let global = GlobalBudgetContext {
        max_context_tokens: 1024,
        ..GlobalBudgetContext::default()
    };
    let outcome = process_turn(
        entries,
        &provider,
        &global,
        &SpeakingContext::single_party(),
        &HeuristicCounter,
        &TurnOptions::default(),
    );

    assert_eq!(outcome.entries.len() + outcome.dropped.len(), total);
    for usage in outcome.usage.values() {
        assert!(usage.is_unlimited() || usage.used <= u64::from(usage.ceiling));
    }
});
