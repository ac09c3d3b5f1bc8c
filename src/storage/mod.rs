//! Persistence for the long-lived learning state.
//!
//! The engine only needs a key/value contract: four well-known keys each
//! hold one JSON document (a list of path statistics, tool statistics,
//! golden templates, or applied feedback ids). [`SqliteStore`] keeps them in a single table;
//! [`MemoryStore`] keeps them in process.

mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageResult;

pub use sqlite::SqliteStore;

/// Key holding the serialized path statistics.
pub const PATH_STATISTICS_KEY: &str = "path_statistics";
/// Key holding the serialized tool statistics.
pub const TOOL_STATISTICS_KEY: &str = "tool_statistics";
/// Key holding the serialized golden templates.
pub const GOLDEN_TEMPLATES_KEY: &str = "golden_templates";
/// Key holding the ids of applied execution feedback.
pub const FEEDBACK_LEDGER_KEY: &str = "feedback_ledger";

/// Key/value persistence for learning state.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load the document stored under `key`, if any.
    async fn load(&self, key: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous document.
    async fn save(&self, key: &str, value: &serde_json::Value) -> StorageResult<()>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> StorageResult<Option<serde_json::Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &serde_json::Value) -> StorageResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
