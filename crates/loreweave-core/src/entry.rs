//! World-info entries handed to the ordering pipeline.

use serde::{Deserialize, Serialize};

/// Where the host collected an entry from.
///
/// Informational only: once entries are ordered the categories collapse
/// into a single sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Global,
    Character,
    Chat,
    Persona,
}

/// One injectable unit of lore.
///
/// Created by the host for a single generation turn. The pipeline only
/// writes `effective_order`, `admitted` and `disabled`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier, used to break ordering ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,

    /// Owning lorebook. `None` (or an empty name) means no lorebook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Activation keys; matching is the host's job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    #[serde(default)]
    pub content: String,

    /// Host-assigned order hint (defaults to 100 when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_order: Option<i64>,

    /// Admitted without consuming the lorebook's token budget.
    #[serde(default)]
    pub ignore_budget: bool,

    #[serde(default)]
    pub category: Category,

    /// Composite sort key assigned by the orderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_order: Option<i64>,

    #[serde(default)]
    pub admitted: bool,

    #[serde(default)]
    pub disabled: bool,
}

impl Entry {
    /// Create an entry with the given id, lorebook and content.
    pub fn new(uid: u64, group: Option<&str>, content: impl Into<String>) -> Self {
        Self {
            uid: Some(uid),
            group: group.map(str::to_string),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_base_order(mut self, order: i64) -> Self {
        self.base_order = Some(order);
        self
    }

    pub fn in_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn ignoring_budget(mut self) -> Self {
        self.ignore_budget = true;
        self
    }

    /// The owning lorebook, treating an empty name as none.
    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }
}

/// Entries gathered per source, as the host collects them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntrySources {
    #[serde(default)]
    pub global: Vec<Entry>,
    #[serde(default)]
    pub character: Vec<Entry>,
    #[serde(default)]
    pub chat: Vec<Entry>,
    #[serde(default)]
    pub persona: Vec<Entry>,
}

impl EntrySources {
    /// Concatenate all sources (global, character, chat, persona), tagging
    /// each entry with its category.
    pub fn combined(self) -> Vec<Entry> {
        let tagged = |entries: Vec<Entry>, category: Category| {
            entries.into_iter().map(move |e| e.in_category(category))
        };
        tagged(self.global, Category::Global)
            .chain(tagged(self.character, Category::Character))
            .chain(tagged(self.chat, Category::Chat))
            .chain(tagged(self.persona, Category::Persona))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.character.len() + self.chat.len() + self.persona.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
