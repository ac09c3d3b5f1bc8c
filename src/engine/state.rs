//! Owned, long-lived learning state.
//!
//! Constructed once per process, optionally hydrated from a
//! [`PersistentStore`], shared by handle with the orchestrator and the tool
//! selector, and flushed back on shutdown. The applied-feedback ledger is
//! persisted alongside the statistics so a replayed execution report is
//! still recognised after a restart.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use super::golden::{GoldenTemplate, GoldenTemplateStore};
use super::ledger::{AppliedFeedback, FeedbackLedger};
use super::statistics::{ArmStatistics, StatisticsStore};
use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::storage::{
    PersistentStore, FEEDBACK_LEDGER_KEY, GOLDEN_TEMPLATES_KEY, PATH_STATISTICS_KEY,
    TOOL_STATISTICS_KEY,
};

/// Path statistics, tool statistics, golden templates and applied feedback.
#[derive(Clone)]
pub struct LearningState {
    pub paths: Arc<StatisticsStore>,
    pub tools: Arc<StatisticsStore>,
    pub golden: Arc<GoldenTemplateStore>,
    /// Applied execution feedback ids.
    pub feedback: Arc<FeedbackLedger>,
}

/// Record counts after hydration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationReport {
    pub paths: usize,
    pub tools: usize,
    pub templates: usize,
    /// Applied feedback ids restored into the ledger.
    pub feedback_events: usize,
}

impl LearningState {
    /// Cold, empty state.
    pub fn new(config: &Config) -> Self {
        let lock_timeout = Duration::from_millis(config.bandit.lock_timeout_ms);
        Self {
            paths: Arc::new(StatisticsStore::new("paths", lock_timeout)),
            tools: Arc::new(StatisticsStore::new("tools", lock_timeout)),
            golden: Arc::new(GoldenTemplateStore::new(config.golden.clone())),
            feedback: Arc::new(FeedbackLedger::new()),
        }
    }

    /// Load whatever the store holds. Each key that is missing or fails to
    /// load starts cold; a failure is logged, never returned.
    pub async fn hydrate(&self, store: &dyn PersistentStore) -> HydrationReport {
        let mut report = HydrationReport::default();

        if let Some(records) = load_or_warn::<Vec<ArmStatistics>>(store, PATH_STATISTICS_KEY).await {
            report.paths = records.len();
            self.paths.replace_all(records).await;
        }
        if let Some(records) = load_or_warn::<Vec<ArmStatistics>>(store, TOOL_STATISTICS_KEY).await {
            report.tools = records.len();
            self.tools.replace_all(records).await;
        }
        if let Some(templates) = load_or_warn::<Vec<GoldenTemplate>>(store, GOLDEN_TEMPLATES_KEY).await {
            report.templates = templates.len();
            self.golden.replace_all(templates).await;
        }
        if let Some(applied) = load_or_warn::<Vec<AppliedFeedback>>(store, FEEDBACK_LEDGER_KEY).await {
            report.feedback_events = applied.len();
            self.feedback.replace_all(applied).await;
        }

        info!(
            paths = report.paths,
            tools = report.tools,
            templates = report.templates,
            feedback_events = report.feedback_events,
            "Learning state hydrated"
        );
        report
    }

    /// Write all four documents to the store.
    pub async fn flush(&self, store: &dyn PersistentStore) -> StorageResult<()> {
        save(store, PATH_STATISTICS_KEY, &self.paths.all().await).await?;
        save(store, TOOL_STATISTICS_KEY, &self.tools.all().await).await?;
        save(store, GOLDEN_TEMPLATES_KEY, &self.golden.all().await).await?;
        save(store, FEEDBACK_LEDGER_KEY, &self.feedback.all().await).await?;
        info!(
            paths = self.paths.len().await,
            tools = self.tools.len().await,
            templates = self.golden.len().await,
            feedback_events = self.feedback.len().await,
            "Learning state flushed"
        );
        Ok(())
    }
}

async fn load_or_warn<T: DeserializeOwned>(store: &dyn PersistentStore, key: &str) -> Option<T> {
    let value = match store.load(key).await {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to load learning state, starting cold");
            return None;
        }
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key = %key, error = %e, "Stored learning state is malformed, starting cold");
            None
        }
    }
}

async fn save<T: Serialize>(store: &dyn PersistentStore, key: &str, value: &T) -> StorageResult<()> {
    let json = serde_json::to_value(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.save(key, &json).await
}
