//! Priority ordering: one flat, deterministic sequence across every lorebook.
//!
//! Each entry gets a composite key
//! `priority * 10_000 + order_adjustment + min(base_order, 9_999)` and the
//! sequence is sorted highest first. The resolved priority is compared before
//! the composite key, so a lower tier can never outrank a higher one even when
//! an adjustment pushes its key into the next tier's band.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::entry::Entry;
use crate::resolve::ResolvedConfig;

/// Width of one priority tier in the composite key.
pub const PRIORITY_STRIDE: i64 = 10_000;
/// Base order assumed for entries that don't carry one.
pub const DEFAULT_BASE_ORDER: i64 = 100;
/// Base orders are capped here so they stay inside one tier's band.
pub const MAX_BASE_ORDER: i64 = 9_999;

/// Result of an ordering pass.
#[derive(Debug, Clone, Default)]
pub struct OrderOutcome {
    /// Surviving entries, highest effective order first.
    pub entries: Vec<Entry>,
    /// Entries removed by the `only_when_speaking` gate, in input order.
    pub filtered: Vec<Entry>,
}

/// Compute an entry's composite key, or `None` on arithmetic overflow.
pub fn effective_order(base_order: Option<i64>, resolved: &ResolvedConfig) -> Option<i64> {
    let capped_base = base_order.unwrap_or(DEFAULT_BASE_ORDER).min(MAX_BASE_ORDER);
    i64::from(resolved.priority.get())
        .checked_mul(PRIORITY_STRIDE)?
        .checked_add(resolved.order_adjustment)?
        .checked_add(capped_base)
}

/// Order entries across all lorebooks.
///
/// `resolve_fn` is called at most once per distinct lorebook name; entries
/// without a lorebook use the default configuration.
pub fn order<F>(entries: Vec<Entry>, resolve_fn: F) -> Vec<Entry>
where
    F: FnMut(&str) -> ResolvedConfig,
{
    order_detailed(entries, resolve_fn).entries
}

/// Like [`order`], but also hands back the entries the speaker gate removed.
pub fn order_detailed<F>(entries: Vec<Entry>, mut resolve_fn: F) -> OrderOutcome
where
    F: FnMut(&str) -> ResolvedConfig,
{
    let ungrouped = ResolvedConfig::default();
    let mut cache: HashMap<String, ResolvedConfig> = HashMap::new();
    let mut keyed = Vec::with_capacity(entries.len());
    let mut filtered = Vec::new();

    for (index, mut entry) in entries.into_iter().enumerate() {
        let resolved = match entry.group_name() {
            Some(group) => {
                if !cache.contains_key(group) {
                    cache.insert(group.to_string(), resolve_fn(group));
                }
                &cache[group]
            }
            None => &ungrouped,
        };

        if !resolved.is_active() {
            debug!(group = ?entry.group_name(), uid = ?entry.uid, "lorebook inactive for this speaker");
            filtered.push(entry);
            continue;
        }

        let key = match effective_order(entry.base_order, resolved) {
            Some(key) => key,
            None => {
                let raw = entry.base_order.unwrap_or(DEFAULT_BASE_ORDER);
                warn!(
                    group = ?entry.group_name(),
                    uid = ?entry.uid,
                    base_order = raw,
                    "effective order overflowed, keeping base order"
                );
                raw
            }
        };
        entry.effective_order = Some(key);
        keyed.push(Keyed {
            priority: resolved.priority.get(),
            key,
            index,
            entry,
        });
    }

    keyed.sort_by(compare);

    OrderOutcome {
        entries: keyed.into_iter().map(|k| k.entry).collect(),
        filtered,
    }
}

struct Keyed {
    priority: u8,
    key: i64,
    index: usize,
    entry: Entry,
}

fn compare(a: &Keyed, b: &Keyed) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.key.cmp(&a.key))
        .then_with(|| compare_uid(a.entry.uid, b.entry.uid))
        .then_with(|| a.entry.group_name().cmp(&b.entry.group_name()))
        .then_with(|| a.index.cmp(&b.index))
}

// Ascending, with identified entries ahead of anonymous ones.
fn compare_uid(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreweave_config::Priority;
    use pretty_assertions::assert_eq;

    fn config(priority: Priority, adjustment: i64) -> ResolvedConfig {
        ResolvedConfig {
            priority,
            order_adjustment: adjustment,
            ..ResolvedConfig::default()
        }
    }

    fn by_group(group: &str) -> ResolvedConfig {
        match group {
            "A" => config(Priority::HIGHEST, 0),
            "B" => config(Priority::LOWEST, 0),
            _ => ResolvedConfig::default(),
        }
    }

    fn uids(entries: &[Entry]) -> Vec<Option<u64>> {
        entries.iter().map(|e| e.uid).collect()
    }

    #[test]
    fn test_effective_order_formula() {
        assert_eq!(
            effective_order(Some(50), &config(Priority::HIGHEST, 0)),
            Some(50_050)
        );
        assert_eq!(
            effective_order(Some(999), &config(Priority::LOWEST, 0)),
            Some(10_999)
        );
        assert_eq!(
            effective_order(None, &ResolvedConfig::default()),
            Some(30_100)
        );
        assert_eq!(
            effective_order(Some(50_000), &config(Priority::HIGH, -250)),
            Some(49_749)
        );
    }

    #[test]
    fn test_effective_order_overflow() {
        assert_eq!(
            effective_order(Some(1), &config(Priority::HIGHEST, i64::MAX)),
            None
        );
    }

    #[test_log::test]
    fn test_overflow_keeps_base_order() {
        let resolve = |_: &str| config(Priority::HIGHEST, i64::MAX);
        let ordered = order(vec![Entry::new(1, Some("A"), "a").with_base_order(42)], resolve);
        assert_eq!(ordered[0].effective_order, Some(42));
    }

    #[test]
    fn test_high_priority_lorebook_first() {
        let entries = vec![
            Entry::new(1, Some("B"), "b").with_base_order(999),
            Entry::new(2, Some("A"), "a").with_base_order(50),
        ];
        let ordered = order(entries, by_group);
        assert_eq!(uids(&ordered), vec![Some(2), Some(1)]);
        assert_eq!(ordered[0].effective_order, Some(50_050));
        assert_eq!(ordered[1].effective_order, Some(10_999));
    }

    #[test]
    fn test_priority_dominates_adjustment() {
        // Normal + 10000 would land above High + (-10000) by key alone.
        let resolve = |group: &str| match group {
            "boosted" => config(Priority::NORMAL, 10_000),
            _ => config(Priority::HIGH, -10_000),
        };
        let entries = vec![
            Entry::new(1, Some("boosted"), "x").with_base_order(9_999),
            Entry::new(2, Some("sunk"), "y").with_base_order(0),
        ];
        let ordered = order(entries, resolve);
        assert_eq!(uids(&ordered), vec![Some(2), Some(1)]);
        assert!(ordered[0].effective_order < ordered[1].effective_order);
    }

    #[test]
    fn test_base_order_is_capped() {
        let entries = vec![
            Entry::new(1, None, "a").with_base_order(9_999),
            Entry::new(2, None, "b").with_base_order(1_000_000),
        ];
        let ordered = order(entries, by_group);
        assert_eq!(ordered[0].effective_order, Some(39_999));
        assert_eq!(ordered[1].effective_order, Some(39_999));
        // Equal keys fall back to uid.
        assert_eq!(uids(&ordered), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_tie_breakers() {
        let mut anonymous = Entry::new(0, Some("Z"), "anon");
        anonymous.uid = None;
        let mut anonymous_a = anonymous.clone();
        anonymous_a.group = Some("Y".into());
        let entries = vec![
            anonymous,
            Entry::new(7, Some("Z"), "seven"),
            anonymous_a,
            Entry::new(3, Some("Z"), "three"),
        ];
        let ordered = order(entries, |_| ResolvedConfig::default());
        let keys: Vec<(Option<u64>, Option<&str>)> = ordered
            .iter()
            .map(|e| (e.uid, e.group_name()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Some(3), Some("Z")),
                (Some(7), Some("Z")),
                (None, Some("Y")),
                (None, Some("Z")),
            ]
        );
    }

    #[test]
    fn test_resolve_called_once_per_group() {
        let mut calls = Vec::new();
        let entries = vec![
            Entry::new(1, Some("A"), "a"),
            Entry::new(2, Some("A"), "b"),
            Entry::new(3, Some("B"), "c"),
            Entry::new(4, None, "d"),
        ];
        let ordered = order(entries, |group| {
            calls.push(group.to_string());
            by_group(group)
        });
        assert_eq!(ordered.len(), 4);
        assert_eq!(calls, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_inactive_lorebook_filtered_even_when_ignoring_budget() {
        let silent = ResolvedConfig {
            only_when_speaking: true,
            ..ResolvedConfig::default()
        };
        let entries = vec![
            Entry::new(1, Some("Silent"), "s").ignoring_budget(),
            Entry::new(2, None, "free"),
        ];
        let outcome = order_detailed(entries, |_| silent.clone());
        assert_eq!(uids(&outcome.entries), vec![Some(2)]);
        assert_eq!(uids(&outcome.filtered), vec![Some(1)]);
    }

    #[test]
    fn test_order_is_deterministic() {
        let entries: Vec<Entry> = (0..20)
            .map(|i| {
                let group = if i % 2 == 0 { "A" } else { "B" };
                Entry::new(i, Some(group), format!("e{i}")).with_base_order((i as i64 * 37) % 11)
            })
            .collect();
        let mut reversed = entries.clone();
        reversed.reverse();

        let first = order(entries, by_group);
        let second = order(reversed, by_group);
        assert_eq!(uids(&first), uids(&second));
    }
}
