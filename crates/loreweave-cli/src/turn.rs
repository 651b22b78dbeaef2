//! Turn files and the settings layering used by the CLI.
//!
//! A turn file describes one generation turn in TOML:
//!
//! ```toml
//! speaker = "Nova"          # omit for a single-party conversation
//! generation = 2            # generations since the conversation opened
//!
//! [[global]]
//! uid = 1
//! group = "Eldoria"
//! content = "Eldoria is a river city."
//! base_order = 50
//!
//! [[character]]
//! uid = 2
//! group = "Nova's Diary"
//! content = "Nova keeps a diary."
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use loreweave_config::GroupSettings;
use loreweave_core::store::{FileStore, SettingsStore, StoreError};
use loreweave_core::{BoxFuture, Entry, EntrySources, TurnOutcome, character_key};
use serde::{Deserialize, Serialize};

/// One turn as read from disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnFile {
    /// Character whose turn it is in a group chat.
    #[serde(default)]
    pub speaker: Option<String>,

    /// Avatar file of the speaker; its stem becomes the override key.
    #[serde(default)]
    pub avatar: Option<String>,

    /// Generations since the conversation changed, this one included.
    #[serde(default = "default_generation")]
    pub generation: u32,

    #[serde(flatten)]
    pub sources: EntrySources,
}

fn default_generation() -> u32 {
    1
}

impl TurnFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read turn file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid turn file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Override key of the speaker, preferring the avatar stem.
    pub fn speaker_key(&self) -> Option<String> {
        let name = self.speaker.as_deref().unwrap_or_default();
        let key = character_key(self.avatar.as_deref().unwrap_or_default(), name);
        (!key.is_empty()).then_some(key)
    }
}

/// Lorebook documents first, then `[lorebooks]` from the config file.
pub struct LayeredStore {
    pub documents: FileStore,
    pub configured: BTreeMap<String, GroupSettings>,
}

impl SettingsStore for LayeredStore {
    fn load<'a>(
        &'a self,
        group: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupSettings>, StoreError>> {
        Box::pin(async move {
            match self.documents.load(group).await? {
                Some(settings) => Ok(Some(settings)),
                None => Ok(self.configured.get(group).cloned()),
            }
        })
    }

    fn save<'a>(
        &'a self,
        group: &'a str,
        settings: GroupSettings,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        self.documents.save(group, settings)
    }
}

/// Serializable view of one entry in a report.
#[derive(Debug, Serialize)]
pub struct EntryRow {
    pub uid: Option<u64>,
    pub group: Option<String>,
    pub effective_order: Option<i64>,
    pub status: &'static str,
    pub content: String,
}

impl EntryRow {
    fn new(entry: &Entry, status: &'static str) -> Self {
        Self {
            uid: entry.uid,
            group: entry.group_name().map(str::to_string),
            effective_order: entry.effective_order,
            status,
            content: entry.content.clone(),
        }
    }
}

/// Machine-readable result of `loreweave order --json`.
#[derive(Debug, Serialize)]
pub struct TurnReport {
    pub entries: Vec<EntryRow>,
    pub usage: BTreeMap<String, loreweave_core::GroupUsage>,
    pub notices: Vec<String>,
    /// Warnings logged while the turn ran.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub fail_open: bool,
}

impl From<&TurnOutcome> for TurnReport {
    fn from(outcome: &TurnOutcome) -> Self {
        let mut entries: Vec<EntryRow> = outcome
            .entries
            .iter()
            .map(|e| EntryRow::new(e, if e.disabled { "dropped" } else { "admitted" }))
            .collect();
        // Structural seam: dropped entries are not in `entries`.
        if !outcome.entries.iter().any(|e| e.disabled) {
            entries.extend(outcome.dropped.iter().map(|e| EntryRow::new(e, "dropped")));
        }
        entries.extend(outcome.filtered.iter().map(|e| EntryRow::new(e, "inactive")));
        Self {
            entries,
            usage: outcome.usage.clone(),
            notices: outcome.notices.iter().map(ToString::to_string).collect(),
            warnings: Vec::new(),
            fail_open: outcome.fail_open,
        }
    }
}
