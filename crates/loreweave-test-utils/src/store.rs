//! File-backed store fixtures.
//!
//! Helpers for constructing [`FileStore`] instances over a temporary
//! lorebook directory.

use std::path::{Path, PathBuf};

use loreweave_core::FileStore;
use serde_json::Value;
use tempfile::TempDir;

/// A test-scoped [`FileStore`] with an owned temp directory.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestStore {
    pub store: FileStore,
    pub dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestStore {
    /// Create a store over an empty lorebook directory.
    pub fn empty() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let dir = temp_dir.path().join("lorebooks");
        std::fs::create_dir_all(&dir).expect("failed to create lorebook dir");
        Self {
            store: FileStore::new(&dir),
            dir,
            _temp_dir: temp_dir,
        }
    }

    /// Create a store seeded with lorebook documents.
    pub async fn with_documents(documents: &[(&str, Value)]) -> Self {
        let fixture = Self::empty();
        for (name, document) in documents {
            fixture.write_document(name, document).await;
        }
        fixture
    }

    /// Write (or overwrite) a lorebook document.
    pub async fn write_document(&self, name: &str, document: &Value) {
        let rendered = serde_json::to_string_pretty(document).expect("failed to render document");
        tokio::fs::write(self.path(name), rendered)
            .await
            .expect("failed to write lorebook document");
    }

    /// Write raw text as a lorebook document, for malformed-input tests.
    pub async fn write_raw(&self, name: &str, raw: &str) {
        tokio::fs::write(self.path(name), raw)
            .await
            .expect("failed to write lorebook document");
    }

    /// Read a lorebook document back as JSON.
    pub async fn read_document(&self, name: &str) -> Value {
        let raw = tokio::fs::read_to_string(self.path(name))
            .await
            .expect("failed to read lorebook document");
        serde_json::from_str(&raw).expect("lorebook document is not JSON")
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
