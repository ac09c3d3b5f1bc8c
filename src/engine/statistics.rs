//! Long-lived arm statistics shared across decision sessions.
//!
//! One [`ArmStatistics`] record exists per path fingerprint (and, in a
//! separate store, per tool id). Records are never deleted; stale records are
//! down-weighted through [`DecayPolicy`] at read time so that early lucky
//! paths cannot lock in forever.
//!
//! # Concurrency
//!
//! [`StatisticsStore`] keeps one `Mutex` per key behind a map-level `RwLock`.
//! Read-modify-write on a key holds that key's mutex only, so updates to
//! different fingerprints proceed in parallel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use super::types::{FeedbackSource, Outcome};
use crate::config::BanditConfig;
use crate::error::{FeedbackError, FeedbackResult};

// ============================================================================
// Algorithm Parameters
// ============================================================================

/// Per-algorithm parameters maintained alongside the raw counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmParams {
    /// Beta shape alpha for Thompson sampling (successes + 1).
    pub beta_alpha: f64,
    /// Beta shape beta for Thompson sampling (failures + 1).
    pub beta_beta: f64,
    /// UCB visit count.
    pub ucb_visits: u64,
    /// UCB running mean reward.
    pub ucb_mean_reward: f64,
    /// Epsilon-greedy running mean reward.
    pub greedy_mean_reward: f64,
    /// Epsilon in effect at the last update.
    pub epsilon: f64,
}

impl Default for AlgorithmParams {
    fn default() -> Self {
        Self {
            beta_alpha: 1.0,
            beta_beta: 1.0,
            ucb_visits: 0,
            ucb_mean_reward: 0.0,
            greedy_mean_reward: 0.0,
            epsilon: 0.0,
        }
    }
}

// ============================================================================
// Decay Policy
// ============================================================================

/// Staleness decay applied to success/failure counts when computing rates.
#[derive(Debug, Clone, Copy)]
pub struct DecayPolicy {
    pub window: chrono::Duration,
    pub factor: f64,
}

impl DecayPolicy {
    /// Build from bandit configuration.
    pub fn from_config(config: &BanditConfig) -> Self {
        Self {
            window: chrono::Duration::hours(config.staleness_window_hours as i64),
            factor: config.staleness_decay,
        }
    }

    /// Multiplier in (0, 1] for a record last used at `last_used`.
    ///
    /// Every full staleness window elapsed multiplies the weight by `factor`.
    pub fn weight(&self, last_used: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(last_used) = last_used else {
            return 1.0;
        };
        let window_secs = self.window.num_seconds().max(1);
        let elapsed_secs = (now - last_used).num_seconds().max(0);
        let periods = elapsed_secs / window_secs;
        if periods == 0 {
            1.0
        } else {
            self.factor.powi(periods.min(i32::MAX as i64) as i32)
        }
    }
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self::from_config(&BanditConfig::default())
    }
}

// ============================================================================
// Arm Statistics
// ============================================================================

/// Human-readable identity of an arm, kept so promoted templates can be
/// rebuilt from statistics alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmLabel {
    /// Path type or tool capability family.
    pub kind: String,
    pub description: String,
}

/// Accumulated statistics for one arm (path fingerprint or tool id).
///
/// Invariant: `pulls == successes + failures`. Cumulative reward is tracked
/// independently and may be any real value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStatistics {
    pub key: String,
    pub pulls: u64,
    pub successes: u64,
    pub failures: u64,
    pub cumulative_reward: f64,
    /// Times the bandit chose this arm (not necessarily followed by an outcome).
    pub selections: u64,
    pub verification_pulls: u64,
    pub execution_pulls: u64,
    pub first_seen: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    /// Most recent outcomes, newest last, capped at the rolling window size.
    pub recent_outcomes: VecDeque<bool>,
    pub params: AlgorithmParams,
    #[serde(default)]
    pub label: Option<ArmLabel>,
    /// Entered the trial ground as a newly learned (aha or golden) path.
    #[serde(default)]
    pub learned: bool,
    /// Selections left with the decaying exploration boost.
    #[serde(default)]
    pub boost_remaining: u32,
}

/// Statistics keyed by path fingerprint.
pub type PathStatistics = ArmStatistics;

/// Statistics keyed by tool id; `last_used` is the recency timestamp and
/// `pulls` the sample-sufficiency counter read by the cold-start detector.
pub type ToolStatistics = ArmStatistics;

impl ArmStatistics {
    /// Fresh, all-zero statistics.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pulls: 0,
            successes: 0,
            failures: 0,
            cumulative_reward: 0.0,
            selections: 0,
            verification_pulls: 0,
            execution_pulls: 0,
            first_seen: Utc::now(),
            last_used: None,
            recent_outcomes: VecDeque::new(),
            params: AlgorithmParams::default(),
            label: None,
            learned: false,
            boost_remaining: 0,
        }
    }

    /// Mark the arm as newly learned with `rounds` boosted selections.
    /// Returns false if it was already learned.
    pub fn enter_trial(&mut self, rounds: u32) -> bool {
        if self.learned {
            return false;
        }
        self.learned = true;
        self.boost_remaining = rounds;
        true
    }

    /// Use up one boosted selection.
    pub fn consume_boost(&mut self) {
        self.boost_remaining = self.boost_remaining.saturating_sub(1);
    }

    /// Apply one outcome observation.
    pub fn record(
        &mut self,
        outcome: Outcome,
        reward: f64,
        source: FeedbackSource,
        now: DateTime<Utc>,
        rolling_window: usize,
        epsilon: f64,
    ) {
        self.pulls += 1;
        if outcome.is_success() {
            self.successes += 1;
            self.params.beta_alpha += 1.0;
        } else {
            self.failures += 1;
            self.params.beta_beta += 1.0;
        }
        self.cumulative_reward += reward;

        match source {
            FeedbackSource::Verification => self.verification_pulls += 1,
            FeedbackSource::Execution => self.execution_pulls += 1,
        }

        self.params.ucb_visits += 1;
        let n = self.params.ucb_visits as f64;
        self.params.ucb_mean_reward += (reward - self.params.ucb_mean_reward) / n;
        self.params.greedy_mean_reward += (reward - self.params.greedy_mean_reward) / n;
        self.params.epsilon = epsilon;

        self.recent_outcomes.push_back(outcome.is_success());
        while self.recent_outcomes.len() > rolling_window.max(1) {
            self.recent_outcomes.pop_front();
        }

        self.last_used = Some(now);
    }

    /// Raw success rate; zero when never pulled.
    pub fn success_rate(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.successes as f64 / self.pulls as f64
        }
    }

    /// Success rate over the rolling window, if any outcome is recorded.
    pub fn rolling_success_rate(&self) -> Option<f64> {
        if self.recent_outcomes.is_empty() {
            return None;
        }
        let wins = self.recent_outcomes.iter().filter(|s| **s).count();
        Some(wins as f64 / self.recent_outcomes.len() as f64)
    }

    /// Decayed (successes, failures).
    pub fn effective_counts(&self, decay: &DecayPolicy, now: DateTime<Utc>) -> (f64, f64) {
        let w = decay.weight(self.last_used, now);
        (self.successes as f64 * w, self.failures as f64 * w)
    }

    /// Decayed success rate; zero when never pulled.
    pub fn effective_success_rate(&self, decay: &DecayPolicy, now: DateTime<Utc>) -> f64 {
        let (s, f) = self.effective_counts(decay, now);
        if s + f <= 0.0 {
            0.0
        } else {
            s / (s + f)
        }
    }

    /// Beta posterior mean `(s + 1) / (s + f + 2)` over decayed counts.
    pub fn posterior_mean(&self, decay: &DecayPolicy, now: DateTime<Utc>) -> f64 {
        let (s, f) = self.effective_counts(decay, now);
        (s + 1.0) / (s + f + 2.0)
    }

    /// Mean reward per pull.
    pub fn mean_reward(&self) -> f64 {
        if self.pulls == 0 {
            0.0
        } else {
            self.cumulative_reward / self.pulls as f64
        }
    }
}

/// Map a reward from [-1, 1] into [0, 1].
pub fn normalize_reward(reward: f64) -> f64 {
    ((reward + 1.0) / 2.0).clamp(0.0, 1.0)
}

// ============================================================================
// Statistics Store
// ============================================================================

/// Shared, per-key locked statistics map.
pub struct StatisticsStore {
    name: &'static str,
    cells: RwLock<HashMap<String, Arc<Mutex<ArmStatistics>>>>,
    lock_timeout: Duration,
}

impl StatisticsStore {
    /// Create an empty store. `name` only labels log events.
    pub fn new(name: &'static str, lock_timeout: Duration) -> Self {
        Self {
            name,
            cells: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    async fn cell(&self, key: &str) -> Arc<Mutex<ArmStatistics>> {
        if let Some(cell) = self.cells.read().await.get(key) {
            return cell.clone();
        }
        let mut cells = self.cells.write().await;
        cells
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ArmStatistics::new(key))))
            .clone()
    }

    /// Acquire one key's lock.
    ///
    /// The lock is awaited for at most the configured timeout; a timed out
    /// attempt is retried once, after which [`FeedbackError::Contended`] is
    /// returned and the caller drops its update.
    pub async fn lock(&self, key: &str) -> FeedbackResult<OwnedMutexGuard<ArmStatistics>> {
        let cell = self.cell(key).await;
        for attempt in 0..2 {
            match tokio::time::timeout(self.lock_timeout, cell.clone().lock_owned()).await {
                Ok(guard) => return Ok(guard),
                Err(_) => {
                    debug!(store = self.name, key = %key, attempt, "Statistics lock contended");
                }
            }
        }
        warn!(
            store = self.name,
            key = %key,
            "Dropping statistics update after lock contention"
        );
        Err(FeedbackError::Contended {
            key: key.to_string(),
        })
    }

    /// Atomically read-modify-write one key. `f` runs at most once.
    pub async fn update<F, R>(&self, key: &str, f: F) -> FeedbackResult<R>
    where
        F: FnOnce(&mut ArmStatistics) -> R,
    {
        let mut guard = self.lock(key).await?;
        Ok(f(&mut *guard))
    }

    /// Snapshot of one key, if it exists.
    pub async fn get(&self, key: &str) -> Option<ArmStatistics> {
        let cell = self.cells.read().await.get(key).cloned()?;
        let guard = cell.lock().await;
        Some(guard.clone())
    }

    /// Snapshots for the given keys; unknown keys yield cold, all-zero records.
    pub async fn snapshot_many<'a, I>(&self, keys: I) -> Vec<ArmStatistics>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out = Vec::new();
        for key in keys {
            out.push(self.get(key).await.unwrap_or_else(|| ArmStatistics::new(key)));
        }
        out
    }

    /// Snapshot of every record, sorted by key.
    pub async fn all(&self) -> Vec<ArmStatistics> {
        let cells: Vec<_> = self.cells.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.lock().await.clone());
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Replace the whole map, e.g. after hydrating from persistent storage.
    pub async fn replace_all(&self, records: Vec<ArmStatistics>) {
        let mut cells = self.cells.write().await;
        cells.clear();
        for record in records {
            cells.insert(record.key.clone(), Arc::new(Mutex::new(record)));
        }
    }

    /// Number of tracked keys.
    pub async fn len(&self) -> usize {
        self.cells.read().await.len()
    }

    /// Whether no key is tracked yet.
    pub async fn is_empty(&self) -> bool {
        self.cells.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stats: &mut ArmStatistics, success: bool) {
        stats.record(
            Outcome::from(success),
            if success { 1.0 } else { -1.0 },
            FeedbackSource::Execution,
            Utc::now(),
            10,
            0.1,
        );
    }

    #[test]
    fn test_record_keeps_pull_invariant() {
        let mut stats = ArmStatistics::new("fp");
        for i in 0..7 {
            record(&mut stats, i % 3 != 0);
            assert_eq!(stats.pulls, stats.successes + stats.failures);
        }
        assert_eq!(stats.params.beta_alpha, stats.successes as f64 + 1.0);
        assert_eq!(stats.params.beta_beta, stats.failures as f64 + 1.0);
        assert_eq!(stats.execution_pulls, 7);
    }

    #[test]
    fn test_running_means() {
        let mut stats = ArmStatistics::new("fp");
        record(&mut stats, true);
        record(&mut stats, false);
        assert!((stats.params.ucb_mean_reward - 0.0).abs() < 1e-9);
        assert!((stats.mean_reward() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_is_capped() {
        let mut stats = ArmStatistics::new("fp");
        for _ in 0..15 {
            record(&mut stats, true);
        }
        for _ in 0..5 {
            record(&mut stats, false);
        }
        assert_eq!(stats.recent_outcomes.len(), 10);
        assert_eq!(stats.rolling_success_rate(), Some(0.5));
        assert_eq!(stats.success_rate(), 0.75);
    }

    #[test]
    fn test_decay_weight() {
        let policy = DecayPolicy {
            window: chrono::Duration::hours(24),
            factor: 0.5,
        };
        let now = Utc::now();
        assert_eq!(policy.weight(None, now), 1.0);
        assert_eq!(policy.weight(Some(now - chrono::Duration::hours(1)), now), 1.0);
        assert_eq!(policy.weight(Some(now - chrono::Duration::hours(49)), now), 0.25);
    }

    #[test]
    fn test_stale_counts_shrink_but_raw_counts_stay() {
        let policy = DecayPolicy {
            window: chrono::Duration::hours(1),
            factor: 0.5,
        };
        let mut stats = ArmStatistics::new("fp");
        for _ in 0..8 {
            record(&mut stats, true);
        }
        let later = Utc::now() + chrono::Duration::hours(3);
        let (s, f) = stats.effective_counts(&policy, later);
        assert_eq!(s, 1.0);
        assert_eq!(f, 0.0);
        assert_eq!(stats.successes, 8);
        // Posterior is pulled back towards 0.5 by the decay.
        assert!(stats.posterior_mean(&policy, later) < stats.posterior_mean(&policy, Utc::now()));
    }

    #[test]
    fn test_trial_ground_entry_is_one_shot() {
        let mut stats = ArmStatistics::new("fp");
        assert!(stats.enter_trial(3));
        assert!(!stats.enter_trial(3));
        for _ in 0..5 {
            stats.consume_boost();
        }
        assert_eq!(stats.boost_remaining, 0);
        assert!(stats.learned);
    }

    #[test]
    fn test_normalize_reward() {
        assert_eq!(normalize_reward(-1.0), 0.0);
        assert_eq!(normalize_reward(1.0), 1.0);
        assert_eq!(normalize_reward(5.0), 1.0);
        assert_eq!(normalize_reward(0.0), 0.5);
    }

    #[tokio::test]
    async fn test_store_update_and_snapshot() {
        let store = StatisticsStore::new("paths", Duration::from_millis(100));
        assert!(store.is_empty().await);

        store
            .update("a", |s| {
                s.record(Outcome::Success, 1.0, FeedbackSource::Execution, Utc::now(), 10, 0.1)
            })
            .await
            .unwrap();

        let snap = store.snapshot_many(["a", "b"]).await;
        assert_eq!(snap[0].pulls, 1);
        assert_eq!(snap[1].pulls, 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_serialized_per_key() {
        let store = Arc::new(StatisticsStore::new("paths", Duration::from_secs(5)));
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("shared", |s| {
                        s.record(
                            Outcome::from(i % 2 == 0),
                            0.5,
                            FeedbackSource::Execution,
                            Utc::now(),
                            10,
                            0.1,
                        )
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let stats = store.get("shared").await.unwrap();
        assert_eq!(stats.pulls, 32);
        assert_eq!(stats.successes, 16);
        assert_eq!(stats.failures, 16);
    }

    #[tokio::test]
    async fn test_update_contended_is_dropped() {
        let store = Arc::new(StatisticsStore::new("paths", Duration::from_millis(20)));
        store.update("k", |_| ()).await.unwrap();

        let cell = store.cell("k").await;
        let _held = cell.lock().await;

        let result = store
            .update("k", |s| {
                s.record(Outcome::Success, 1.0, FeedbackSource::Execution, Utc::now(), 10, 0.1)
            })
            .await;
        assert!(matches!(result, Err(FeedbackError::Contended { .. })));
    }
}
