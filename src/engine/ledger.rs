//! Durable record of applied execution feedback.
//!
//! Execution feedback (a caller reporting how a chosen path or tool worked
//! out) must count exactly once for the lifetime of the learning state, so
//! its event ids are kept here without eviction and persisted with the rest
//! of the learning state. Instant-learning verification events are
//! generated internally and only need the converger's short in-memory
//! window.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One applied execution feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedFeedback {
    /// Id of the applied event.
    pub event_id: String,
    /// Statistics key the event updated.
    pub key: String,
    /// When the update was applied.
    pub applied_at: DateTime<Utc>,
}

/// Never-evicting set of applied execution event ids.
#[derive(Debug, Default)]
pub struct FeedbackLedger {
    applied: RwLock<HashMap<String, AppliedFeedback>>,
}

impl FeedbackLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an event id. Returns false if it was already applied.
    pub async fn claim(&self, event_id: &str, key: &str) -> bool {
        let mut applied = self.applied.write().await;
        if applied.contains_key(event_id) {
            return false;
        }
        applied.insert(
            event_id.to_string(),
            AppliedFeedback {
                event_id: event_id.to_string(),
                key: key.to_string(),
                applied_at: Utc::now(),
            },
        );
        true
    }

    /// Give an id back after its update was dropped.
    pub async fn release(&self, event_id: &str) {
        self.applied.write().await.remove(event_id);
    }

    /// Whether an event id has been applied.
    pub async fn contains(&self, event_id: &str) -> bool {
        self.applied.read().await.contains_key(event_id)
    }

    /// Every applied event, oldest first.
    pub async fn all(&self) -> Vec<AppliedFeedback> {
        let mut all: Vec<_> = self.applied.read().await.values().cloned().collect();
        all.sort_by(|a, b| {
            a.applied_at
                .cmp(&b.applied_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        all
    }

    /// Replace the whole ledger (hydration).
    pub async fn replace_all(&self, records: Vec<AppliedFeedback>) {
        let mut applied = self.applied.write().await;
        applied.clear();
        for record in records {
            applied.insert(record.event_id.clone(), record);
        }
    }

    /// Number of applied events.
    pub async fn len(&self) -> usize {
        self.applied.read().await.len()
    }

    /// Whether nothing has been applied yet.
    pub async fn is_empty(&self) -> bool {
        self.applied.read().await.is_empty()
    }
}
