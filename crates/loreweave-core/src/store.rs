//! Lorebook settings storage.
//!
//! [`SettingsStore`] is the async seam to wherever the host keeps lorebook
//! documents. Two implementations ship here:
//!
//! - [`MemoryStore`] keeps settings in a map (tests, embedding hosts).
//! - [`FileStore`] keeps one JSON document per lorebook in a directory, with
//!   the ordering settings under the `"loreweave"` key. Other keys of the
//!   document belong to the host and are preserved on save.
//!
//! [`SettingsCache`] is the per-turn read-through layer in front of a store.
//! The ordering pipeline reads it synchronously through [`SettingsProvider`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use loreweave_config::{ConfigError, GroupSettings};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::BoxFuture;

/// Key of the lorebook document that holds ordering settings.
pub const SETTINGS_KEY: &str = "loreweave";

/// Errors from a settings store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed lorebook document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid lorebook name: {0:?}")]
    InvalidName(String),

    #[error("refusing to save invalid settings: {0}")]
    Invalid(#[from] ConfigError),
}

/// Async access to persisted lorebook settings.
///
/// Uses [`BoxFuture`] so stores can be shared as `&dyn SettingsStore`.
pub trait SettingsStore: Send + Sync {
    /// Load a lorebook's settings. `Ok(None)` means the lorebook has none.
    fn load<'a>(
        &'a self,
        group: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupSettings>, StoreError>>;

    /// Persist a lorebook's settings, filling unset fields with defaults.
    fn save<'a>(
        &'a self,
        group: &'a str,
        settings: GroupSettings,
    ) -> BoxFuture<'a, Result<(), StoreError>>;
}

// ── Memory store ────────────────────────────────────────────────

/// Settings held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: tokio::sync::RwLock<HashMap<String, GroupSettings>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without validation.
    pub fn with_groups(groups: impl IntoIterator<Item = (String, GroupSettings)>) -> Self {
        Self {
            groups: tokio::sync::RwLock::new(groups.into_iter().collect()),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load<'a>(
        &'a self,
        group: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupSettings>, StoreError>> {
        Box::pin(async move { Ok(self.groups.read().await.get(group).cloned()) })
    }

    fn save<'a>(
        &'a self,
        group: &'a str,
        settings: GroupSettings,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            settings.validate(group)?;
            self.groups
                .write()
                .await
                .insert(group.to_string(), settings.with_defaults());
            Ok(())
        })
    }
}

// ── File store ──────────────────────────────────────────────────

/// One JSON document per lorebook: `<dir>/<name>.json`.
///
/// Decoded settings are cached after the first read; saving a lorebook
/// drops its cached copy.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    cache: tokio::sync::RwLock<HashMap<String, Option<GroupSettings>>>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a lorebook's document.
    pub fn document_path(&self, group: &str) -> Result<PathBuf, StoreError> {
        validate_name(group)?;
        Ok(self.dir.join(format!("{group}.json")))
    }

    /// Names of every lorebook document in the directory, sorted.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        loop {
            let next = dir.next_entry().await.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(item) = next else { break };
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_document(&self, path: &Path) -> Result<Option<Map<String, Value>>, StoreError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let value: Value = serde_json::from_str(&raw).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        match value {
            Value::Object(doc) => Ok(Some(doc)),
            _ => {
                warn!(path = %path.display(), "lorebook document is not an object, ignoring it");
                Ok(Some(Map::new()))
            }
        }
    }
}

impl SettingsStore for FileStore {
    fn load<'a>(
        &'a self,
        group: &'a str,
    ) -> BoxFuture<'a, Result<Option<GroupSettings>, StoreError>> {
        Box::pin(async move {
            if let Some(cached) = self.cache.read().await.get(group) {
                return Ok(cached.clone());
            }

            let path = self.document_path(group)?;
            let settings = self
                .read_document(&path)
                .await?
                .and_then(|doc| doc.get(SETTINGS_KEY).map(GroupSettings::from_json_lenient));
            debug!(group, found = settings.is_some(), "loaded lorebook settings");

            self.cache
                .write()
                .await
                .insert(group.to_string(), settings.clone());
            Ok(settings)
        })
    }

    fn save<'a>(
        &'a self,
        group: &'a str,
        settings: GroupSettings,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let path = self.document_path(group)?;
            settings.validate(group)?;

            let mut doc = self.read_document(&path).await?.unwrap_or_default();
            let value = serde_json::to_value(settings.with_defaults()).map_err(|source| {
                StoreError::Json {
                    path: path.clone(),
                    source,
                }
            })?;
            doc.insert(SETTINGS_KEY.to_string(), value);

            let rendered = serde_json::to_string_pretty(&Value::Object(doc)).map_err(|source| {
                StoreError::Json {
                    path: path.clone(),
                    source,
                }
            })?;
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|source| StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })?;
            tokio::fs::write(&path, rendered)
                .await
                .map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;

            self.cache.write().await.remove(group);
            debug!(group, path = %path.display(), "saved lorebook settings");
            Ok(())
        })
    }
}

fn validate_name(group: &str) -> Result<(), StoreError> {
    let bad = group.trim().is_empty()
        || group.starts_with('.')
        || group.contains(['/', '\\', '\0']);
    if bad {
        Err(StoreError::InvalidName(group.to_string()))
    } else {
        Ok(())
    }
}

// ── Per-turn cache ──────────────────────────────────────────────

/// Synchronous settings lookup used while ordering.
pub trait SettingsProvider {
    /// Settings of a lorebook, or `None` if they are not available.
    fn settings(&self, group: &str) -> Option<GroupSettings>;
}

impl SettingsProvider for BTreeMap<String, GroupSettings> {
    fn settings(&self, group: &str) -> Option<GroupSettings> {
        self.get(group).cloned()
    }
}

impl SettingsProvider for HashMap<String, GroupSettings> {
    fn settings(&self, group: &str) -> Option<GroupSettings> {
        self.get(group).cloned()
    }
}

/// Settings of the lorebooks referenced in the current turn.
///
/// Filled by [`SettingsCache::load_all`] before ordering starts, read without
/// awaiting afterwards.
#[derive(Debug, Default)]
pub struct SettingsCache {
    groups: RwLock<HashMap<String, GroupSettings>>,
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every listed lorebook not already cached.
    ///
    /// Missing settings and store failures both resolve to defaults; failures
    /// are logged. Returns the number of lorebooks fetched from the store.
    pub async fn load_all<S>(&self, store: &S, groups: &BTreeSet<String>) -> usize
    where
        S: SettingsStore + ?Sized,
    {
        let mut fetched = 0;
        for group in groups {
            if self.contains(group) {
                continue;
            }
            let settings = match store.load(group).await {
                Ok(found) => found.unwrap_or_default(),
                Err(e) => {
                    warn!(group = %group, error = %e, "failed to load lorebook settings, using defaults");
                    GroupSettings::default()
                }
            };
            self.insert(group.clone(), settings);
            fetched += 1;
        }
        fetched
    }

    pub fn insert(&self, group: String, settings: GroupSettings) {
        if let Ok(mut groups) = self.groups.write() {
            groups.insert(group, settings);
        }
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups
            .read()
            .map(|groups| groups.contains_key(group))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.groups.read().map(|groups| groups.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut groups) = self.groups.write() {
            groups.clear();
        }
    }
}

impl SettingsProvider for SettingsCache {
    fn settings(&self, group: &str) -> Option<GroupSettings> {
        self.groups.read().ok()?.get(group).cloned()
    }
}
