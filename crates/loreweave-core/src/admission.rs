//! Budget admission: greedy, best-first packing per lorebook.
//!
//! Entries are walked in their final order. Each lorebook has its own
//! ceiling (see [`allocate`](crate::budget::allocate)); an entry is admitted
//! while its lorebook still has room and dropped otherwise. A ceiling of 0
//! admits everything without tracking. Counters start fresh on every call.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::budget::{GlobalBudgetContext, allocate};
use crate::entry::Entry;
use crate::resolve::ResolvedConfig;
use crate::token::TokenCounter;

/// Token accounting for one lorebook during one admission pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupUsage {
    /// Token ceiling (0 = unlimited).
    pub ceiling: u32,
    /// Tokens charged against the ceiling.
    pub used: u64,
    pub admitted: usize,
    pub dropped: usize,
}

impl GroupUsage {
    fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            ..Self::default()
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.ceiling == 0
    }

    /// Tokens still available, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u64> {
        (!self.is_unlimited()).then(|| u64::from(self.ceiling).saturating_sub(self.used))
    }

    /// Charge `tokens` if they fit. Returns `true` on success.
    pub fn try_charge(&mut self, tokens: u64) -> bool {
        if self.is_unlimited() {
            return true;
        }
        match self.used.checked_add(tokens) {
            Some(total) if total <= u64::from(self.ceiling) => {
                self.used = total;
                true
            }
            _ => false,
        }
    }
}

/// Outcome of an admission pass.
#[derive(Debug, Clone, Default)]
pub struct Admission {
    /// Every input entry in its original order, flagged `admitted` or
    /// `disabled`.
    pub entries: Vec<Entry>,
    /// Usage per lorebook name, for entries that belong to one.
    pub usage: BTreeMap<String, GroupUsage>,
}

impl Admission {
    pub fn admitted(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.admitted)
    }

    pub fn dropped(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(|e| e.disabled)
    }

    /// Split into `(admitted, dropped)`, each keeping order.
    pub fn into_parts(self) -> (Vec<Entry>, Vec<Entry>) {
        self.entries.into_iter().partition(|e| e.admitted)
    }
}

/// Admit entries against their lorebook ceilings.
///
/// `ordered` should already be sorted by [`order`](crate::order::order).
/// Tokenizer failures count the entry as 0 tokens and log a warning.
pub fn admit<F, C>(
    ordered: Vec<Entry>,
    mut resolve_fn: F,
    global: &GlobalBudgetContext,
    counter: &C,
) -> Admission
where
    F: FnMut(&str) -> ResolvedConfig,
    C: TokenCounter + ?Sized,
{
    let mut usage: BTreeMap<String, GroupUsage> = BTreeMap::new();
    let mut entries = Vec::with_capacity(ordered.len());

    for mut entry in ordered {
        entry.admitted = false;
        entry.disabled = false;

        let Some(group) = entry.group_name().map(str::to_string) else {
            entry.admitted = true;
            entries.push(entry);
            continue;
        };

        // Ceilings are resolved once per lorebook per pass.
        let slot = usage
            .entry(group.clone())
            .or_insert_with(|| GroupUsage::new(allocate(&resolve_fn(&group), global)));
        let ceiling = slot.ceiling;

        if ceiling == 0 || entry.ignore_budget {
            entry.admitted = true;
            slot.admitted += 1;
            entries.push(entry);
            continue;
        }

        let tokens = match counter.count_tokens(&entry.content) {
            Ok(n) => n as u64,
            Err(e) => {
                warn!(group = %group, uid = ?entry.uid, error = %e, "token count failed, charging 0");
                0
            }
        };

        if slot.try_charge(tokens) {
            entry.admitted = true;
            slot.admitted += 1;
        } else {
            debug!(
                group = %group,
                uid = ?entry.uid,
                tokens,
                ceiling,
                used = slot.used,
                "entry over lorebook budget"
            );
            entry.disabled = true;
            slot.dropped += 1;
        }
        entries.push(entry);
    }

    Admission { entries, usage }
}
