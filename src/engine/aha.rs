//! Aha-moment trigger.
//!
//! A two-state machine (Normal, Bypass) that detects pool-wide deadlock and
//! asks for a creative batch of paths. It holds no reference to the pipeline;
//! callers feed it the pool's confidences and verdicts and it decides.
//!
//! # Conditions
//!
//! While at least one path holds confidence at or above the floor, the
//! trigger never fires. Otherwise it fires when any of these hold:
//!
//! - every path is below the confidence floor
//! - the last `failure_streak` sessions ended without a confident decision
//! - verification judged every path infeasible
//!
//! Bypass lasts one decision round and is never sticky.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::Verdict;
use crate::config::AhaConfig;

/// Trigger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AhaState {
    /// Normal convergence.
    Normal,
    /// Creative paths are being injected for this round.
    Bypass,
}

impl AhaState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            AhaState::Normal => "normal",
            AhaState::Bypass => "bypass",
        }
    }
}

impl std::fmt::Display for AhaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why the trigger fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AhaReason {
    AllBelowConfidenceFloor,
    FailureStreak,
    AllInfeasible,
}

/// Counters exposed for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AhaStats {
    pub state: AhaState,
    pub total_triggers: u64,
    pub consecutive_failures: u32,
    pub last_reasons: Vec<AhaReason>,
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Deadlock detector driving the creative bypass.
#[derive(Debug, Clone)]
pub struct AhaTrigger {
    state: AhaState,
    consecutive_failures: u32,
    total_triggers: u64,
    last_reasons: Vec<AhaReason>,
    last_triggered_at: Option<DateTime<Utc>>,
    config: AhaConfig,
}

impl AhaTrigger {
    /// Create a trigger in the Normal state.
    pub fn new(config: AhaConfig) -> Self {
        Self {
            state: AhaState::Normal,
            consecutive_failures: 0,
            total_triggers: 0,
            last_reasons: Vec::new(),
            last_triggered_at: None,
            config,
        }
    }

    /// Current state.
    pub fn state(&self) -> AhaState {
        self.state
    }

    /// Size of the creative batch to request.
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Evaluate the pool and enter Bypass if it is deadlocked.
    ///
    /// Returns the reasons when the trigger fires. Does nothing while already
    /// in Bypass, so one round fires at most once.
    pub fn evaluate(&mut self, confidences: &[f64], verdicts: &[Verdict]) -> Option<Vec<AhaReason>> {
        if self.state == AhaState::Bypass {
            return None;
        }
        let reasons = self.reasons(confidences, verdicts);
        if reasons.is_empty() {
            return None;
        }

        self.state = AhaState::Bypass;
        self.total_triggers += 1;
        self.last_reasons = reasons.clone();
        self.last_triggered_at = Some(Utc::now());
        info!(
            reasons = ?reasons,
            streak = self.consecutive_failures,
            total_triggers = self.total_triggers,
            "Aha-moment triggered, entering bypass"
        );
        Some(reasons)
    }

    /// Conditions that currently hold, without changing state.
    pub fn reasons(&self, confidences: &[f64], verdicts: &[Verdict]) -> Vec<AhaReason> {
        let floor = self.config.confidence_floor;
        if confidences.iter().any(|c| *c >= floor) {
            return Vec::new();
        }

        // An empty pool is vacuously below the floor.
        let mut reasons = vec![AhaReason::AllBelowConfidenceFloor];
        if self.consecutive_failures >= self.config.failure_streak {
            reasons.push(AhaReason::FailureStreak);
        }
        if !verdicts.is_empty() && verdicts.iter().all(|v| *v == Verdict::Infeasible) {
            reasons.push(AhaReason::AllInfeasible);
        }
        reasons
    }

    /// End the decision round: Bypass always returns to Normal.
    pub fn complete_round(&mut self) {
        if self.state == AhaState::Bypass {
            info!("Aha bypass round complete, returning to normal");
        }
        self.state = AhaState::Normal;
    }

    /// Per-session copy in the Normal state, carrying the current streak.
    ///
    /// Concurrent sessions each run their own round; the shared ledger only
    /// accumulates streak and trigger counts.
    pub fn fork(&self) -> Self {
        Self {
            state: AhaState::Normal,
            consecutive_failures: self.consecutive_failures,
            total_triggers: 0,
            last_reasons: Vec::new(),
            last_triggered_at: None,
            config: self.config.clone(),
        }
    }

    /// Fold a finished session round back into this ledger.
    pub fn merge(&mut self, round: &AhaTrigger) {
        if round.total_triggers == 0 {
            return;
        }
        self.total_triggers += round.total_triggers;
        self.last_reasons = round.last_reasons.clone();
        self.last_triggered_at = round.last_triggered_at;
    }

    /// Record how a session ended. Failures extend the streak, a success
    /// resets it.
    pub fn record_outcome(&mut self, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// Consecutive unsuccessful sessions.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> AhaStats {
        AhaStats {
            state: self.state,
            total_triggers: self.total_triggers,
            consecutive_failures: self.consecutive_failures,
            last_reasons: self.last_reasons.clone(),
            last_triggered_at: self.last_triggered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> AhaTrigger {
        AhaTrigger::new(AhaConfig::default())
    }

    #[test]
    fn test_never_fires_with_confident_path() {
        let mut t = trigger();
        for _ in 0..5 {
            t.record_outcome(false);
        }
        let fired = t.evaluate(
            &[0.0, 0.31],
            &[Verdict::Infeasible, Verdict::Infeasible],
        );
        assert!(fired.is_none());
        assert_eq!(t.state(), AhaState::Normal);
    }

    #[test]
    fn test_fires_when_all_infeasible() {
        let mut t = trigger();
        let reasons = t
            .evaluate(&[0.0, 0.0, 0.0], &[Verdict::Infeasible; 3])
            .unwrap();
        assert!(reasons.contains(&AhaReason::AllInfeasible));
        assert!(reasons.contains(&AhaReason::AllBelowConfidenceFloor));
        assert_eq!(t.state(), AhaState::Bypass);
    }

    #[test]
    fn test_fires_once_per_round() {
        let mut t = trigger();
        assert!(t.evaluate(&[0.1], &[Verdict::Uncertain]).is_some());
        assert!(t.evaluate(&[0.1], &[Verdict::Uncertain]).is_none());
        t.complete_round();
        assert_eq!(t.state(), AhaState::Normal);
        assert!(t.evaluate(&[0.1], &[Verdict::Uncertain]).is_some());
        assert_eq!(t.stats().total_triggers, 2);
    }

    #[test]
    fn test_failure_streak_reason() {
        let mut t = trigger();
        for _ in 0..3 {
            t.record_outcome(false);
        }
        let reasons = t.reasons(&[0.1], &[Verdict::Uncertain]);
        assert_eq!(
            reasons,
            vec![AhaReason::AllBelowConfidenceFloor, AhaReason::FailureStreak]
        );

        t.record_outcome(true);
        assert_eq!(t.consecutive_failures(), 0);
        assert_eq!(
            t.reasons(&[0.1], &[Verdict::Uncertain]),
            vec![AhaReason::AllBelowConfidenceFloor]
        );
        assert!(t.reasons(&[0.5], &[Verdict::Feasible]).is_empty());
    }

    #[test]
    fn test_empty_pool_is_deadlocked() {
        let mut t = trigger();
        assert_eq!(t.evaluate(&[], &[]), Some(vec![AhaReason::AllBelowConfidenceFloor]));
    }

    #[test]
    fn test_fork_and_merge() {
        let mut ledger = trigger();
        ledger.record_outcome(false);

        let mut round = ledger.fork();
        assert_eq!(round.consecutive_failures(), 1);
        assert!(round.evaluate(&[0.0], &[Verdict::Infeasible]).is_some());
        round.complete_round();

        ledger.merge(&round);
        let stats = ledger.stats();
        assert_eq!(stats.total_triggers, 1);
        assert_eq!(stats.state, AhaState::Normal);
        assert!(stats.last_reasons.contains(&AhaReason::AllInfeasible));
    }

    #[test]
    fn test_mixed_verdicts_only_floor_reason() {
        let t = trigger();
        let reasons = t.reasons(&[0.0, 0.2], &[Verdict::Infeasible, Verdict::Uncertain]);
        assert_eq!(reasons, vec![AhaReason::AllBelowConfidenceFloor]);
    }
}
