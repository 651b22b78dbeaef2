//! Per-turn orchestration.
//!
//! A turn moves strictly forward through
//! `Idle → SettingsLoaded → Ordered → Admitted → Committed`. Settings for every
//! lorebook referenced in the turn are loaded (async) before ordering starts;
//! ordering and admission then run synchronously against the loaded copy.
//!
//! Nothing that goes wrong inside the pipeline aborts a generation: the
//! orchestrator falls back to the host's entries in their original order,
//! without budget enforcement, and reports a single [`Notice::FailOpen`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use loreweave_config::{BudgetSeam, InsertionStrategy, OrderingConfig};
use tracing::{debug, info, warn};

use crate::admission::{GroupUsage, admit};
use crate::budget::GlobalBudgetContext;
use crate::entry::Entry;
use crate::order::order_detailed;
use crate::resolve::{ResolvedConfig, SpeakingContext, resolve};
use crate::store::{SettingsCache, SettingsProvider, SettingsStore};
use crate::token::TokenCounter;
use crate::trim::trim;

/// Where the current turn stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnPhase {
    #[default]
    Idle,
    SettingsLoaded,
    Ordered,
    Admitted,
    Committed,
}

/// Something the host should show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The pipeline failed; entries passed through unordered and unbudgeted.
    FailOpen { reason: String },
    /// Lorebooks ask for custom priorities but the host's insertion strategy
    /// bypasses ordering.
    StrategyMismatch { strategy: InsertionStrategy },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailOpen { reason } => {
                write!(f, "lorebook ordering skipped for this turn: {reason}")
            }
            Self::StrategyMismatch { strategy } => write!(
                f,
                "lorebooks have custom priorities but the insertion strategy is {strategy:?}; \
                 switch to evenly for priority ordering to apply"
            ),
        }
    }
}

/// Failures inside the pipeline. Never surfaced to the host as errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("settings were not loaded (turn is {0:?})")]
    SettingsNotLoaded(TurnPhase),

    #[error("lorebook {0:?} was not loaded for this turn")]
    MissingSettings(String),
}

/// Options for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnOptions {
    pub insertion_strategy: InsertionStrategy,
    pub seam: BudgetSeam,
    /// Generations started since the last conversation change, this one
    /// included.
    pub generations_since_chat_change: u32,
}

impl From<&OrderingConfig> for TurnOptions {
    fn from(config: &OrderingConfig) -> Self {
        Self {
            insertion_strategy: config.insertion_strategy,
            seam: config.seam,
            generations_since_chat_change: 0,
        }
    }
}

/// What a turn hands back to the host.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Entries to inject. Under [`BudgetSeam::Structural`] only admitted
    /// ones; under [`BudgetSeam::Textual`] every ordered entry, with dropped
    /// ones flagged `disabled`.
    pub entries: Vec<Entry>,
    /// Entries that did not fit their lorebook budget.
    pub dropped: Vec<Entry>,
    /// Entries removed because their lorebook is inactive for the speaker.
    pub filtered: Vec<Entry>,
    pub usage: BTreeMap<String, GroupUsage>,
    pub notices: Vec<Notice>,
    pub fail_open: bool,
}

impl TurnOutcome {
    fn passthrough(entries: Vec<Entry>, notices: Vec<Notice>) -> Self {
        Self {
            entries,
            notices,
            ..Self::default()
        }
    }

    /// Remove dropped entries' text from a prompt rendered with every entry.
    pub fn trim_prompt(&self, rendered: &str) -> String {
        trim(rendered, &self.dropped)
    }
}

/// Per-conversation state carried between events.
#[derive(Debug, Default)]
pub struct TurnContext {
    pub phase: TurnPhase,
    pub speaking: SpeakingContext,
    pub settings: SettingsCache,
    pub generations_since_chat_change: u32,
}

impl TurnContext {
    fn end_turn(&mut self) {
        self.phase = TurnPhase::Idle;
        self.speaking.clear();
        self.settings.clear();
    }
}

/// Drives the ordering pipeline across host events.
#[derive(Debug, Default)]
pub struct Orchestrator {
    context: TurnContext,
    ordering: OrderingConfig,
}

impl Orchestrator {
    pub fn new(ordering: OrderingConfig) -> Self {
        Self {
            context: TurnContext::default(),
            ordering,
        }
    }

    pub fn from_config(config: &loreweave_config::AppConfig) -> Self {
        Self::new(config.ordering.clone())
    }

    pub fn context(&self) -> &TurnContext {
        &self.context
    }

    pub fn phase(&self) -> TurnPhase {
        self.context.phase
    }

    // ── Host events ─────────────────────────────────────────────

    pub fn on_conversation_changed(&mut self) {
        self.context.end_turn();
        self.context.generations_since_chat_change = 0;
    }

    pub fn on_generation_started(&mut self) {
        self.context.generations_since_chat_change =
            self.context.generations_since_chat_change.saturating_add(1);
    }

    pub fn on_generation_ended(&mut self) {
        self.context.end_turn();
    }

    /// A group-chat member was chosen to speak next.
    pub fn on_speaker_drafted(&mut self, character: &str) {
        self.context.speaking.clear();
        if !character.is_empty() {
            self.context.speaking = SpeakingContext::speaking(character);
        }
        debug!(character, "speaker drafted");
    }

    // ── Turn ────────────────────────────────────────────────────

    /// Load settings for every lorebook referenced by `entries`.
    pub async fn load_settings<S>(&mut self, store: &S, entries: &[Entry])
    where
        S: SettingsStore + ?Sized,
    {
        if self.context.phase > TurnPhase::SettingsLoaded {
            debug!(phase = ?self.context.phase, "previous turn not ended, starting a new one");
            self.context.settings.clear();
        }
        let fetched = self
            .context
            .settings
            .load_all(store, &referenced_groups(entries))
            .await;
        debug!(fetched, cached = self.context.settings.len(), "lorebook settings loaded");
        self.context.phase = TurnPhase::SettingsLoaded;
    }

    /// Order and admit `entries` with the loaded settings.
    ///
    /// Never fails; on pipeline errors the entries come back untouched.
    pub fn process<C>(
        &mut self,
        entries: Vec<Entry>,
        global: &GlobalBudgetContext,
        counter: &C,
    ) -> TurnOutcome
    where
        C: TokenCounter + ?Sized,
    {
        let original = entries.clone();
        let outcome = self.try_process(entries, global, counter);
        self.context.phase = TurnPhase::Committed;
        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "lorebook ordering failed, passing entries through");
                let mut outcome = TurnOutcome::passthrough(
                    original,
                    vec![Notice::FailOpen {
                        reason: e.to_string(),
                    }],
                );
                outcome.fail_open = true;
                outcome
            }
        }
    }

    /// [`load_settings`](Self::load_settings) followed by
    /// [`process`](Self::process).
    pub async fn run_turn<S, C>(
        &mut self,
        store: &S,
        entries: Vec<Entry>,
        global: &GlobalBudgetContext,
        counter: &C,
    ) -> TurnOutcome
    where
        S: SettingsStore + ?Sized,
        C: TokenCounter + ?Sized,
    {
        self.load_settings(store, &entries).await;
        self.process(entries, global, counter)
    }

    fn try_process<C>(
        &mut self,
        entries: Vec<Entry>,
        global: &GlobalBudgetContext,
        counter: &C,
    ) -> Result<TurnOutcome, PipelineError>
    where
        C: TokenCounter + ?Sized,
    {
        if self.context.phase != TurnPhase::SettingsLoaded {
            return Err(PipelineError::SettingsNotLoaded(self.context.phase));
        }
        if let Some(missing) = referenced_groups(&entries)
            .into_iter()
            .find(|group| !self.context.settings.contains(group))
        {
            return Err(PipelineError::MissingSettings(missing));
        }

        let mut options = TurnOptions::from(&self.ordering);
        options.generations_since_chat_change = self.context.generations_since_chat_change;

        Ok(run_pipeline(
            entries,
            &self.context.settings,
            global,
            &self.context.speaking,
            counter,
            &options,
            &mut self.context.phase,
        ))
    }
}

/// Run one turn without event state, for hosts that hold settings in memory.
///
/// Lorebooks the provider doesn't know use default settings.
pub fn process_turn<P, C>(
    entries: Vec<Entry>,
    provider: &P,
    global: &GlobalBudgetContext,
    speaking: &SpeakingContext,
    counter: &C,
    options: &TurnOptions,
) -> TurnOutcome
where
    P: SettingsProvider + ?Sized,
    C: TokenCounter + ?Sized,
{
    let mut phase = TurnPhase::SettingsLoaded;
    run_pipeline(entries, provider, global, speaking, counter, options, &mut phase)
}

fn run_pipeline<P, C>(
    entries: Vec<Entry>,
    provider: &P,
    global: &GlobalBudgetContext,
    speaking: &SpeakingContext,
    counter: &C,
    options: &TurnOptions,
    phase: &mut TurnPhase,
) -> TurnOutcome
where
    P: SettingsProvider + ?Sized,
    C: TokenCounter + ?Sized,
{
    if options.insertion_strategy != InsertionStrategy::Evenly {
        let mut notices = Vec::new();
        let custom = referenced_groups(&entries).into_iter().any(|group| {
            provider
                .settings(&group)
                .is_some_and(|s| s.has_custom_priority())
        });
        // The first generation after a conversation change is the greeting.
        if custom && options.generations_since_chat_change > 1 {
            warn!(strategy = ?options.insertion_strategy, "custom lorebook priorities ignored by insertion strategy");
            notices.push(Notice::StrategyMismatch {
                strategy: options.insertion_strategy,
            });
        }
        *phase = TurnPhase::Committed;
        return TurnOutcome::passthrough(entries, notices);
    }

    let resolve_group = |group: &str| -> ResolvedConfig {
        resolve(&provider.settings(group).unwrap_or_default(), speaking)
    };

    let ordered = order_detailed(entries, resolve_group);
    *phase = TurnPhase::Ordered;

    let admission = admit(ordered.entries, resolve_group, global, counter);
    *phase = TurnPhase::Admitted;

    let usage = admission.usage;
    let (entries, dropped): (Vec<Entry>, Vec<Entry>) = match options.seam {
        BudgetSeam::Structural => admission.entries.into_iter().partition(|e| e.admitted),
        BudgetSeam::Textual => {
            let dropped = admission.entries.iter().filter(|e| e.disabled).cloned().collect();
            (admission.entries, dropped)
        }
    };

    info!(
        injected = entries.len(),
        dropped = dropped.len(),
        filtered = ordered.filtered.len(),
        "lorebook entries ordered"
    );
    *phase = TurnPhase::Committed;

    TurnOutcome {
        entries,
        dropped,
        filtered: ordered.filtered,
        usage,
        notices: Vec::new(),
        fail_open: false,
    }
}

fn referenced_groups(entries: &[Entry]) -> BTreeSet<String> {
    entries
        .iter()
        .filter_map(|e| e.group_name().map(str::to_string))
        .collect()
}

/// Override key for a character, derived from its avatar file name.
///
/// Strips the final extension (`"Nova.png"` → `"Nova"`). Falls back to the
/// display name when the avatar is empty or has nothing before the dot.
pub fn character_key(avatar: &str, name: &str) -> String {
    let stem = match avatar.rfind('.') {
        Some(dot) if dot + 1 < avatar.len() && !avatar[dot + 1..].contains('/') => &avatar[..dot],
        _ => avatar,
    };
    if stem.is_empty() {
        name.to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::token::HeuristicCounter;
    use loreweave_config::{BudgetMode, CharacterOverride, GroupSettings};
    use pretty_assertions::assert_eq;

    fn uids(entries: &[Entry]) -> Vec<Option<u64>> {
        entries.iter().map(|e| e.uid).collect()
    }

    fn budgeted(tokens: f64) -> GroupSettings {
        GroupSettings {
            budget_mode: Some(BudgetMode::FixedTokens),
            budget_value: Some(tokens),
            ..GroupSettings::default()
        }
    }

    fn four_token_entries(group: &str, count: u64) -> Vec<Entry> {
        (1..=count)
            .map(|uid| Entry::new(uid, Some(group), format!("entry {uid:02} text")))
            .collect()
    }

    #[test]
    fn test_character_key() {
        assert_eq!(character_key("Nova.png", "Nova Starling"), "Nova");
        assert_eq!(character_key("Nova.v2.webp", "Nova"), "Nova.v2");
        assert_eq!(character_key("Nova", "Nova Starling"), "Nova");
        assert_eq!(character_key(".png", "Nova"), "Nova");
        assert_eq!(character_key("", "Nova"), "Nova");
        assert_eq!(character_key("Nova.", "Nova"), "Nova.");
    }

    #[test_log::test]
    fn test_process_before_loading_fails_open() {
        let mut orchestrator = Orchestrator::default();
        let entries = vec![
            Entry::new(2, Some("G"), "b").with_base_order(1),
            Entry::new(1, Some("G"), "a").with_base_order(900),
        ];

        let outcome = orchestrator.process(entries.clone(), &GlobalBudgetContext::default(), &HeuristicCounter);
        assert!(outcome.fail_open);
        assert_eq!(outcome.entries, entries);
        assert_eq!(outcome.notices.len(), 1);
        assert!(matches!(outcome.notices[0], Notice::FailOpen { .. }));
        assert_eq!(orchestrator.phase(), TurnPhase::Committed);
    }

    #[tokio::test]
    async fn test_unloaded_group_fails_open() {
        let store = MemoryStore::new();
        let mut orchestrator = Orchestrator::default();
        orchestrator
            .load_settings(&store, &[Entry::new(1, Some("A"), "a")])
            .await;

        let entries = vec![Entry::new(1, Some("A"), "a"), Entry::new(2, Some("B"), "b")];
        let outcome = orchestrator.process(entries, &GlobalBudgetContext::default(), &HeuristicCounter);
        assert!(outcome.fail_open);
        assert_eq!(
            outcome.notices,
            vec![Notice::FailOpen {
                reason: PipelineError::MissingSettings("B".into()).to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_turn_lifecycle() {
        let store = MemoryStore::with_groups([("G".to_string(), budgeted(8.0))]);
        let mut orchestrator = Orchestrator::default();
        assert_eq!(orchestrator.phase(), TurnPhase::Idle);

        orchestrator.on_generation_started();
        let outcome = orchestrator
            .run_turn(
                &store,
                four_token_entries("G", 3),
                &GlobalBudgetContext::default(),
                &HeuristicCounter,
            )
            .await;
        assert!(!outcome.fail_open);
        assert_eq!(uids(&outcome.entries), vec![Some(1), Some(2)]);
        assert_eq!(uids(&outcome.dropped), vec![Some(3)]);
        assert_eq!(orchestrator.phase(), TurnPhase::Committed);
        assert_eq!(orchestrator.context().settings.len(), 1);

        orchestrator.on_generation_ended();
        assert_eq!(orchestrator.phase(), TurnPhase::Idle);
        assert!(orchestrator.context().settings.is_empty());
        assert_eq!(orchestrator.context().generations_since_chat_change, 1);
    }

    #[test]
    fn test_events_reset_speaker() {
        let mut orchestrator = Orchestrator::default();
        orchestrator.on_speaker_drafted("Nova");
        assert_eq!(orchestrator.context().speaking.active(), Some("Nova"));
        orchestrator.on_speaker_drafted("Ash");
        assert_eq!(orchestrator.context().speaking.active(), Some("Ash"));

        orchestrator.on_generation_started();
        orchestrator.on_conversation_changed();
        assert_eq!(orchestrator.context().speaking.active(), None);
        assert_eq!(orchestrator.context().generations_since_chat_change, 0);
    }

    #[tokio::test]
    async fn test_speaker_override_applies_in_turn() {
        let mut guarded = GroupSettings {
            only_when_speaking: Some(true),
            ..GroupSettings::default()
        };
        guarded
            .character_overrides
            .insert("Nova".into(), CharacterOverride::default());
        let store = MemoryStore::with_groups([("Nova's Diary".to_string(), guarded)]);

        let entries = vec![Entry::new(1, Some("Nova's Diary"), "secret"), Entry::new(2, None, "common")];
        let mut orchestrator = Orchestrator::default();

        orchestrator.on_speaker_drafted("Ash");
        let outcome = orchestrator
            .run_turn(&store, entries.clone(), &GlobalBudgetContext::default(), &HeuristicCounter)
            .await;
        assert_eq!(uids(&outcome.entries), vec![Some(2)]);
        assert_eq!(uids(&outcome.filtered), vec![Some(1)]);
        orchestrator.on_generation_ended();

        orchestrator.on_speaker_drafted("Nova");
        let outcome = orchestrator
            .run_turn(&store, entries, &GlobalBudgetContext::default(), &HeuristicCounter)
            .await;
        assert_eq!(outcome.entries.len(), 2);
    }

    #[test]
    fn test_textual_seam_keeps_dropped_entries() {
        let provider: BTreeMap<String, GroupSettings> = [("G".to_string(), budgeted(8.0))].into();
        let options = TurnOptions {
            seam: BudgetSeam::Textual,
            ..TurnOptions::default()
        };
        let entries = four_token_entries("G", 3);
        let outcome = process_turn(
            entries,
            &provider,
            &GlobalBudgetContext::default(),
            &SpeakingContext::single_party(),
            &HeuristicCounter,
            &options,
        );

        assert_eq!(outcome.entries.len(), 3);
        assert!(outcome.entries[2].disabled);
        assert_eq!(uids(&outcome.dropped), vec![Some(3)]);

        let rendered = "entry 01 text\nentry 02 text\nentry 03 text\n";
        assert_eq!(
            outcome.trim_prompt(rendered),
            "entry 01 text\nentry 02 text\n\n"
        );
    }

    #[test]
    fn test_non_evenly_strategy_passes_through() {
        let custom = GroupSettings {
            priority: Some(5),
            ..GroupSettings::default()
        };
        let provider: BTreeMap<String, GroupSettings> = [("G".to_string(), custom)].into();
        let entries = vec![
            Entry::new(1, Some("G"), "a").with_base_order(1),
            Entry::new(2, Some("G"), "b").with_base_order(500),
        ];

        let mut options = TurnOptions {
            insertion_strategy: InsertionStrategy::CharacterFirst,
            generations_since_chat_change: 1,
            ..TurnOptions::default()
        };
        let run = |options: &TurnOptions| {
            process_turn(
                entries.clone(),
                &provider,
                &GlobalBudgetContext::default(),
                &SpeakingContext::single_party(),
                &HeuristicCounter,
                options,
            )
        };

        // Greeting generation: no notice.
        let outcome = run(&options);
        assert_eq!(outcome.entries, entries);
        assert!(outcome.notices.is_empty());

        options.generations_since_chat_change = 2;
        let outcome = run(&options);
        assert_eq!(outcome.entries, entries);
        assert_eq!(
            outcome.notices,
            vec![Notice::StrategyMismatch {
                strategy: InsertionStrategy::CharacterFirst,
            }]
        );
    }
}
