//! MAB converger: path statistics, arm selection, feedback application.
//!
//! Every feedback event (instant learning from verification, or execution
//! feedback from the caller) goes through [`MabConverger::apply_feedback`].
//! Execution event ids are claimed in the durable [`FeedbackLedger`];
//! verification event ids only in a bounded in-memory window.
//! The golden promotion/demotion rule is evaluated while the fingerprint's
//! statistics lock is still held, so it always sees the snapshot that
//! triggered it.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::bandit::{BanditPolicy, ConvergenceReport, Selection};
use super::golden::{GoldenChange, GoldenTemplateStore};
use super::ledger::FeedbackLedger;
use super::statistics::{ArmLabel, StatisticsStore};
use super::types::{FeedbackEvent, FeedbackSource, Outcome, Path, PathOrigin, Verdict};
use crate::config::BanditConfig;
use crate::error::{FeedbackError, FeedbackResult};

/// How many recent verification event ids are remembered for deduplication.
pub const VERIFICATION_DEDUP_CAPACITY: usize = 10_000;

/// Bounded memory of applied verification event ids.
#[derive(Debug)]
struct SeenEvents {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenEvents {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity,
        }
    }

    /// Returns false if the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }

    fn remove(&mut self, id: &str) {
        if self.ids.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }
}

/// Outcome of applying one feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    pub event_id: String,
    pub key: String,
    pub pulls: u64,
    pub success_rate: f64,
    /// Promotions, demotions and evictions caused by this event.
    #[serde(skip)]
    pub golden_changes: Vec<GoldenChange>,
}

/// Path-level bandit over shared statistics.
pub struct MabConverger {
    stats: Arc<StatisticsStore>,
    golden: Arc<GoldenTemplateStore>,
    ledger: Arc<FeedbackLedger>,
    policy: BanditPolicy,
    boost_rounds: u32,
    rng: Mutex<ChaCha8Rng>,
    seen: Mutex<SeenEvents>,
}

impl MabConverger {
    /// Create a converger over shared path statistics, golden templates and
    /// the applied-feedback ledger.
    pub fn new(
        stats: Arc<StatisticsStore>,
        golden: Arc<GoldenTemplateStore>,
        ledger: Arc<FeedbackLedger>,
        config: &BanditConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            stats,
            golden,
            ledger,
            policy: BanditPolicy::for_paths(config),
            boost_rounds: config.exploration_boost_rounds,
            rng: Mutex::new(rng),
            seen: Mutex::new(SeenEvents::new(VERIFICATION_DEDUP_CAPACITY)),
        }
    }

    /// Shared path statistics.
    pub fn statistics(&self) -> &Arc<StatisticsStore> {
        &self.stats
    }

    /// Shared golden template store.
    pub fn golden(&self) -> &Arc<GoldenTemplateStore> {
        &self.golden
    }

    /// Selection policy in use.
    pub fn policy(&self) -> &BanditPolicy {
        &self.policy
    }

    /// Make sure a path's fingerprint is tracked and labelled.
    ///
    /// Aha and golden paths enter the trial ground the first time they are
    /// seen and get a decaying exploration boost.
    pub async fn register_path(&self, path: &Path) -> FeedbackResult<()> {
        let boost_rounds = self.boost_rounds;
        let entered = self
            .stats
            .update(path.fingerprint.as_str(), |stats| {
                if stats.label.is_none() {
                    stats.label = Some(ArmLabel {
                        kind: path.path_type.clone(),
                        description: path.description.clone(),
                    });
                }
                matches!(path.origin, PathOrigin::Aha | PathOrigin::Golden)
                    && stats.enter_trial(boost_rounds)
            })
            .await?;
        if entered {
            debug!(
                fingerprint = %path.fingerprint,
                origin = %path.origin,
                rounds = boost_rounds,
                "Path entered trial ground"
            );
        }
        Ok(())
    }

    /// Convergence report over the given paths' statistics.
    pub async fn convergence(&self, paths: &[Path]) -> ConvergenceReport {
        let arms = self
            .stats
            .snapshot_many(unique_keys(paths).iter().map(String::as_str))
            .await;
        self.policy.assess(&arms, Utc::now())
    }

    /// Pick the winning path among `paths`.
    ///
    /// The winner's selection counter is incremented; pulls are only changed
    /// by feedback.
    pub async fn select_winner(&self, paths: &[Path]) -> Option<(ConvergenceReport, Selection)> {
        let keys = unique_keys(paths);
        let arms = self
            .stats
            .snapshot_many(keys.iter().map(String::as_str))
            .await;

        let (report, selection) = {
            let mut rng = self.rng.lock().await;
            self.policy.select(&arms, Utc::now(), &mut *rng)?
        };

        if let Err(e) = self
            .stats
            .update(&selection.key, |stats| {
                stats.selections += 1;
                stats.consume_boost();
            })
            .await
        {
            warn!(key = %selection.key, error = %e, "Selection counter not updated");
        }

        info!(
            algorithm = %selection.algorithm,
            winner = %selection.key,
            score = selection.score,
            candidates = arms.len(),
            convergence = report.convergence_level,
            "Converger selected winning path"
        );
        Some((report, selection))
    }

    /// Apply one feedback event.
    ///
    /// Repeated event ids are rejected with [`FeedbackError::Duplicate`]. An
    /// update that loses the lock race twice is dropped and reported as
    /// [`FeedbackError::Contended`]; its id is forgotten so it can be resent.
    pub async fn apply_feedback(&self, event: FeedbackEvent) -> FeedbackResult<FeedbackReceipt> {
        if !self.claim(&event).await {
            debug!(event_id = %event.event_id, source = ?event.source, "Duplicate feedback rejected");
            return Err(FeedbackError::Duplicate {
                event_id: event.event_id,
            });
        }

        let mut guard = match self.stats.lock(&event.key).await {
            Ok(guard) => guard,
            Err(e) => {
                self.release(&event).await;
                return Err(e);
            }
        };

        let epsilon = self.policy.epsilon(guard.pulls + 1);
        guard.record(
            event.outcome,
            event.reward,
            event.source,
            event.recorded_at,
            self.golden.config().rolling_window,
            epsilon,
        );
        let golden_changes = self.golden.evaluate(&guard).await;

        let receipt = FeedbackReceipt {
            event_id: event.event_id,
            key: event.key,
            pulls: guard.pulls,
            success_rate: guard.success_rate(),
            golden_changes,
        };
        drop(guard);

        debug!(
            key = %receipt.key,
            source = ?event.source,
            outcome = ?event.outcome,
            pulls = receipt.pulls,
            success_rate = receipt.success_rate,
            "Feedback applied"
        );
        Ok(receipt)
    }

    async fn claim(&self, event: &FeedbackEvent) -> bool {
        match event.source {
            FeedbackSource::Execution => self.ledger.claim(&event.event_id, &event.key).await,
            FeedbackSource::Verification => self.seen.lock().await.insert(&event.event_id),
        }
    }

    async fn release(&self, event: &FeedbackEvent) {
        match event.source {
            FeedbackSource::Execution => self.ledger.release(&event.event_id).await,
            FeedbackSource::Verification => self.seen.lock().await.remove(&event.event_id),
        }
    }

    /// Instant-learning event for a verdict; `None` for uncertain.
    pub fn verification_event(path: &Path, verdict: Verdict, reward: f64) -> Option<FeedbackEvent> {
        let (outcome, reward) = match verdict {
            Verdict::Feasible => (Outcome::Success, reward.abs()),
            Verdict::Infeasible => (Outcome::Failure, -reward.abs()),
            Verdict::Uncertain => return None,
        };
        Some(FeedbackEvent::new(
            path.fingerprint.as_str(),
            outcome,
            reward,
            FeedbackSource::Verification,
        ))
    }

    /// Confidence of a verified path from its (decayed) posterior mean.
    pub async fn confidence_for(&self, path: &Path, verdict: Verdict) -> f64 {
        let posterior = match self.stats.get(path.fingerprint.as_str()).await {
            Some(stats) => stats.posterior_mean(&self.policy.decay, Utc::now()),
            None => 0.5,
        };
        match verdict {
            Verdict::Feasible => posterior,
            Verdict::Uncertain => posterior * 0.5,
            Verdict::Infeasible => 0.0,
        }
    }
}

fn unique_keys(paths: &[Path]) -> Vec<String> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .filter(|p| seen.insert(p.fingerprint.clone()))
        .map(|p| p.fingerprint.as_str().to_string())
        .collect()
}
