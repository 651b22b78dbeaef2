#![deny(unsafe_code)]

//! Loreweave core ordering pipeline.
//!
//! Orders world-info entries from many lorebooks into one deterministic
//! sequence by lorebook priority, enforces per-lorebook token budgets, and
//! drives both across a host's generation events. Keyword matching stays with
//! the host; this crate only sees entries that already matched.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future for async trait methods that
/// need dynamic dispatch (`&dyn SettingsStore`).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Greedy per-lorebook budget admission.
pub mod admission;
/// Token ceilings per lorebook.
pub mod budget;
/// Entry and source types.
pub mod entry;
/// Warning capture for user-visible notices.
pub mod logging;
/// Priority ordering across lorebooks.
pub mod order;
/// Turn state machine and host event hooks.
pub mod orchestrator;
/// Speaker-aware settings resolution.
pub mod resolve;
/// Settings stores and the per-turn cache.
pub mod store;
/// Tokenizer seam.
pub mod token;
/// Scrubbing dropped entries out of rendered prompts.
pub mod trim;

pub use admission::{Admission, GroupUsage, admit};
pub use budget::{GlobalBudgetContext, allocate};
pub use entry::{Category, Entry, EntrySources};
pub use logging::{Warning, WarningCollector, WarningReader};
pub use order::{effective_order, order};
pub use orchestrator::{
    Notice, Orchestrator, PipelineError, TurnContext, TurnOptions, TurnOutcome, TurnPhase,
    character_key, process_turn,
};
pub use resolve::{ResolvedConfig, SpeakingContext, resolve};
pub use store::{FileStore, MemoryStore, SettingsCache, SettingsProvider, SettingsStore, StoreError};
pub use token::{HeuristicCounter, TokenCountError, TokenCounter};
pub use trim::{TrimReport, trim, trim_with_report};
