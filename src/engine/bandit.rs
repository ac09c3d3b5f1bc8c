//! Bandit algorithms and the policy that picks between them.
//!
//! The algorithms form a closed set ([`BanditAlgorithm`]) behind a single
//! `select` capability. Which one runs is decided from the candidates'
//! statistics:
//!
//! | Condition | Algorithm |
//! |---|---|
//! | total pulls below the cold threshold | Thompson sampling |
//! | a leader separated by UCB confidence bounds | UCB1 |
//! | otherwise | Epsilon-greedy |
//!
//! Every algorithm's score gets the arm's exploration boost added: newly
//! learned (aha or golden) arms carry a bonus that decays over their first
//! selections, plus a small permanent one.
//!
//! Equal scores are broken by more pulls first, then the lower key.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::statistics::{normalize_reward, ArmStatistics, DecayPolicy};
use crate::config::BanditConfig;

/// Convergence level at or above which a warm pool counts as converged.
const CONVERGED_LEVEL: f64 = 0.95;

/// Closed set of selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    ThompsonSampling,
    Ucb1,
    EpsilonGreedy,
}

impl BanditAlgorithm {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BanditAlgorithm::ThompsonSampling => "thompson_sampling",
            BanditAlgorithm::Ucb1 => "ucb1",
            BanditAlgorithm::EpsilonGreedy => "epsilon_greedy",
        }
    }
}

impl std::fmt::Display for BanditAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How settled the candidates' performance differences are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Pulls summed over the assessed arms.
    pub total_pulls: u64,
    /// `1 - 3.5 * variance(success rates)` clamped to [0, 1]; zero with fewer
    /// than two pulled arms.
    pub convergence_level: f64,
    /// Key of the arm with the highest success rate.
    pub leader: Option<String>,
    /// The leader's lower confidence bound beats every other arm's upper bound.
    pub leader_separated: bool,
    /// Algorithm the selection will use.
    pub algorithm: BanditAlgorithm,
    /// Enough pulls and a convergence level of at least 0.95.
    pub is_converged: bool,
}

/// Result of one arm selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Key of the chosen arm.
    pub key: String,
    pub algorithm: BanditAlgorithm,
    /// Winning score, including any exploration boost.
    pub score: f64,
    /// Epsilon-greedy took a random exploration step.
    pub explored: bool,
}

/// Algorithm choice and scoring parameters for one statistics family.
#[derive(Debug, Clone)]
pub struct BanditPolicy {
    pub cold_pulls: u64,
    pub ucb_exploration: f64,
    pub epsilon_initial: f64,
    pub epsilon_min: f64,
    pub epsilon_decay: f64,
    pub decay: DecayPolicy,
    /// Selections over which a learned arm's boost decays.
    pub boost_rounds: u32,
    /// Decaying part of the learned-arm boost.
    pub learned_bonus: f64,
    /// Boost a learned arm keeps after its trial rounds.
    pub permanent_bonus: f64,
}

impl BanditPolicy {
    /// Policy for path selection.
    pub fn for_paths(config: &BanditConfig) -> Self {
        Self::with_cold_pulls(config, config.path_cold_pulls)
    }

    /// Policy for tool selection.
    pub fn for_tools(config: &BanditConfig) -> Self {
        Self::with_cold_pulls(config, config.tool_cold_pulls)
    }

    fn with_cold_pulls(config: &BanditConfig, cold_pulls: u64) -> Self {
        Self {
            cold_pulls,
            ucb_exploration: config.ucb_exploration,
            epsilon_initial: config.epsilon_initial,
            epsilon_min: config.epsilon_min,
            epsilon_decay: config.epsilon_decay,
            decay: DecayPolicy::from_config(config),
            boost_rounds: config.exploration_boost_rounds,
            learned_bonus: config.learned_path_bonus,
            permanent_bonus: config.learned_path_permanent_bonus,
        }
    }

    /// Additive trial-ground bonus for an arm; zero for arms never learned.
    pub fn exploration_boost(&self, arm: &ArmStatistics) -> f64 {
        if !arm.learned {
            return 0.0;
        }
        let mut boost = self.permanent_bonus;
        if arm.boost_remaining > 0 && self.boost_rounds > 0 {
            let remaining = arm.boost_remaining.min(self.boost_rounds) as f64;
            boost += self.learned_bonus * remaining / self.boost_rounds as f64;
        }
        boost
    }

    /// Exploration rate, decaying with accumulated pulls.
    pub fn epsilon(&self, total_pulls: u64) -> f64 {
        let decayed = self.epsilon_initial / (1.0 + total_pulls as f64 * self.epsilon_decay);
        decayed.max(self.epsilon_min)
    }

    fn ucb_bonus(&self, total_pulls: u64, arm_pulls: u64) -> f64 {
        if arm_pulls == 0 {
            return f64::INFINITY;
        }
        let total = (total_pulls.max(1)) as f64;
        self.ucb_exploration * (total.ln() / arm_pulls as f64).sqrt()
    }

    /// Compute the convergence report and the algorithm it implies.
    pub fn assess(&self, arms: &[ArmStatistics], now: DateTime<Utc>) -> ConvergenceReport {
        let total_pulls: u64 = arms.iter().map(|a| a.pulls).sum();

        let rates: Vec<f64> = arms
            .iter()
            .filter(|a| a.pulls > 0)
            .map(|a| a.effective_success_rate(&self.decay, now))
            .collect();
        let convergence_level = if rates.len() < 2 {
            0.0
        } else {
            let mean = rates.iter().sum::<f64>() / rates.len() as f64;
            let variance =
                rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;
            (1.0 - variance * 3.5).clamp(0.0, 1.0)
        };

        let (leader, leader_separated) = self.leader_separation(arms, total_pulls, now);

        let algorithm = if total_pulls < self.cold_pulls {
            BanditAlgorithm::ThompsonSampling
        } else if leader_separated {
            BanditAlgorithm::Ucb1
        } else {
            BanditAlgorithm::EpsilonGreedy
        };

        ConvergenceReport {
            total_pulls,
            convergence_level,
            leader,
            leader_separated,
            algorithm,
            is_converged: total_pulls >= self.cold_pulls && convergence_level >= CONVERGED_LEVEL,
        }
    }

    fn leader_separation(
        &self,
        arms: &[ArmStatistics],
        total_pulls: u64,
        now: DateTime<Utc>,
    ) -> (Option<String>, bool) {
        if arms.len() < 2 || total_pulls == 0 {
            return (None, false);
        }
        let means: Vec<f64> = arms
            .iter()
            .map(|a| a.effective_success_rate(&self.decay, now))
            .collect();
        let Some(leader_idx) = best_index(arms, &means) else {
            return (None, false);
        };
        let leader = &arms[leader_idx];
        let leader_lower = means[leader_idx] - self.ucb_bonus(total_pulls, leader.pulls);

        let separated = arms.iter().enumerate().all(|(i, arm)| {
            i == leader_idx || means[i] + self.ucb_bonus(total_pulls, arm.pulls) < leader_lower
        });
        (Some(leader.key.clone()), separated)
    }

    /// Select with an explicit algorithm.
    pub fn select_with<R: Rng>(
        &self,
        algorithm: BanditAlgorithm,
        arms: &[ArmStatistics],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<Selection> {
        if arms.is_empty() {
            return None;
        }
        let total_pulls: u64 = arms.iter().map(|a| a.pulls).sum();

        match algorithm {
            BanditAlgorithm::ThompsonSampling => {
                let scores: Vec<f64> = arms
                    .iter()
                    .map(|arm| {
                        let (s, f) = arm.effective_counts(&self.decay, now);
                        let sampled = match Beta::new(s + 1.0, f + 1.0) {
                            Ok(dist) => dist.sample(&mut *rng),
                            Err(_) => (s + 1.0) / (s + f + 2.0),
                        };
                        if arm.pulls > 0 {
                            sampled * 0.8 + normalize_reward(arm.mean_reward()) * 0.2
                        } else {
                            sampled
                        }
                    })
                    .collect();
                self.pick(algorithm, arms, &scores)
            }
            BanditAlgorithm::Ucb1 => {
                let scores: Vec<f64> = arms
                    .iter()
                    .map(|arm| {
                        let base = arm.effective_success_rate(&self.decay, now) * 0.7
                            + normalize_reward(arm.params.ucb_mean_reward) * 0.3;
                        base + self.ucb_bonus(total_pulls, arm.pulls)
                    })
                    .collect();
                self.pick(algorithm, arms, &scores)
            }
            BanditAlgorithm::EpsilonGreedy => {
                let epsilon = self.epsilon(total_pulls);
                if rng.gen::<f64>() < epsilon {
                    let idx = rng.gen_range(0..arms.len());
                    debug!(key = %arms[idx].key, epsilon, "Epsilon-greedy exploration step");
                    return Some(Selection {
                        key: arms[idx].key.clone(),
                        algorithm,
                        score: epsilon,
                        explored: true,
                    });
                }
                let scores: Vec<f64> = arms
                    .iter()
                    .map(|arm| {
                        if arm.pulls == 0 {
                            0.0
                        } else {
                            arm.effective_success_rate(&self.decay, now) * 0.6
                                + normalize_reward(arm.params.greedy_mean_reward) * 0.4
                        }
                    })
                    .collect();
                self.pick(algorithm, arms, &scores)
            }
        }
    }

    /// Assess the candidates, pick the algorithm, and select an arm.
    pub fn select<R: Rng>(
        &self,
        arms: &[ArmStatistics],
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Option<(ConvergenceReport, Selection)> {
        let report = self.assess(arms, now);
        let selection = self.select_with(report.algorithm, arms, now, rng)?;
        debug!(
            algorithm = %report.algorithm,
            total_pulls = report.total_pulls,
            convergence = report.convergence_level,
            winner = %selection.key,
            "Bandit selection"
        );
        Some((report, selection))
    }

    fn pick(
        &self,
        algorithm: BanditAlgorithm,
        arms: &[ArmStatistics],
        scores: &[f64],
    ) -> Option<Selection> {
        let boosted: Vec<f64> = arms
            .iter()
            .zip(scores)
            .map(|(arm, score)| score + self.exploration_boost(arm))
            .collect();
        let idx = best_index(arms, &boosted)?;
        Some(Selection {
            key: arms[idx].key.clone(),
            algorithm,
            score: boosted[idx],
            explored: false,
        })
    }
}

/// Compare two candidates: higher score, then more pulls, then lower key.
fn rank(a: (&ArmStatistics, f64), b: (&ArmStatistics, f64)) -> Ordering {
    a.1.total_cmp(&b.1)
        .then_with(|| a.0.pulls.cmp(&b.0.pulls))
        .then_with(|| b.0.key.cmp(&a.0.key))
}

fn best_index(arms: &[ArmStatistics], scores: &[f64]) -> Option<usize> {
    (0..arms.len()).max_by(|&i, &j| rank((&arms[i], scores[i]), (&arms[j], scores[j])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{FeedbackSource, Outcome};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn arm(key: &str, successes: u64, failures: u64) -> ArmStatistics {
        let mut stats = ArmStatistics::new(key);
        let now = Utc::now();
        for _ in 0..successes {
            stats.record(Outcome::Success, 1.0, FeedbackSource::Execution, now, 10, 0.1);
        }
        for _ in 0..failures {
            stats.record(Outcome::Failure, -1.0, FeedbackSource::Execution, now, 10, 0.1);
        }
        stats
    }

    fn policy() -> BanditPolicy {
        BanditPolicy::for_paths(&BanditConfig::default())
    }

    #[test]
    fn test_cold_pool_uses_thompson() {
        let arms = vec![arm("a", 2, 1), arm("b", 1, 1)];
        let report = policy().assess(&arms, Utc::now());
        assert_eq!(report.algorithm, BanditAlgorithm::ThompsonSampling);
        assert!(!report.is_converged);
    }

    #[test]
    fn test_clear_leader_uses_ucb() {
        let arms = vec![arm("a", 400, 0), arm("b", 0, 400)];
        let report = policy().assess(&arms, Utc::now());
        assert!(report.leader_separated);
        assert_eq!(report.leader.as_deref(), Some("a"));
        assert_eq!(report.algorithm, BanditAlgorithm::Ucb1);
    }

    #[test]
    fn test_warm_without_leader_uses_epsilon_greedy() {
        let arms = vec![arm("a", 6, 4), arm("b", 5, 5)];
        let report = policy().assess(&arms, Utc::now());
        assert!(!report.leader_separated);
        assert_eq!(report.algorithm, BanditAlgorithm::EpsilonGreedy);
        assert!(report.convergence_level > 0.9);
    }

    #[test]
    fn test_convergence_level_needs_two_pulled_arms() {
        let arms = vec![arm("a", 20, 0), arm("b", 0, 0)];
        let report = policy().assess(&arms, Utc::now());
        assert_eq!(report.convergence_level, 0.0);
    }

    #[test]
    fn test_epsilon_decays_to_floor() {
        let p = policy();
        assert!((p.epsilon(0) - 0.4).abs() < 1e-9);
        assert!(p.epsilon(100) < p.epsilon(10));
        assert_eq!(p.epsilon(1_000_000), 0.1);
    }

    #[test]
    fn test_thompson_is_deterministic_under_fixed_seed() {
        let arms = vec![arm("a", 3, 2), arm("b", 2, 3), arm("c", 1, 1)];
        let now = Utc::now();
        let mut first = ChaCha8Rng::seed_from_u64(7);
        let mut second = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let x = policy().select_with(BanditAlgorithm::ThompsonSampling, &arms, now, &mut first);
            let y =
                policy().select_with(BanditAlgorithm::ThompsonSampling, &arms, now, &mut second);
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_ucb_prefers_unpulled_arm() {
        let arms = vec![arm("a", 10, 0), arm("b", 0, 0)];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let selection = policy()
            .select_with(BanditAlgorithm::Ucb1, &arms, Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.key, "b");
    }

    #[test]
    fn test_tie_break_prefers_more_pulls_then_lower_key() {
        let arms = vec![arm("b", 0, 0), arm("a", 0, 0)];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // All unpulled: infinite UCB scores tie, equal pulls, lower key wins.
        let selection = policy()
            .select_with(BanditAlgorithm::Ucb1, &arms, Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.key, "a");

        // Equal greedy scores (same rate and reward), more pulls wins.
        let arms = vec![arm("a", 2, 2), arm("z", 4, 4)];
        let idx = best_index(&arms, &[0.5, 0.5]).unwrap();
        assert_eq!(arms[idx].key, "z");
    }

    #[test]
    fn test_epsilon_greedy_exploits_best_arm() {
        let mut p = policy();
        p.epsilon_initial = 0.0;
        p.epsilon_min = 0.0;
        let arms = vec![arm("a", 3, 7), arm("b", 8, 2)];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let selection = p
            .select_with(BanditAlgorithm::EpsilonGreedy, &arms, Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.key, "b");
        assert!(!selection.explored);
    }

    fn learned(key: &str) -> ArmStatistics {
        let mut stats = arm(key, 0, 0);
        stats.enter_trial(10);
        stats
    }

    #[test]
    fn test_boost_decays_to_permanent_bonus() {
        let p = policy();
        let mut stats = learned("z");
        assert!((p.exploration_boost(&stats) - 0.2).abs() < 1e-9);
        for _ in 0..5 {
            stats.consume_boost();
        }
        assert!((p.exploration_boost(&stats) - 0.125).abs() < 1e-9);
        for _ in 0..5 {
            stats.consume_boost();
        }
        assert!((p.exploration_boost(&stats) - 0.05).abs() < 1e-9);
        assert_eq!(p.exploration_boost(&arm("a", 0, 0)), 0.0);
    }

    #[test]
    fn test_fresh_aha_arm_outranks_equally_cold_arm() {
        let mut p = policy();
        p.epsilon_initial = 0.0;
        p.epsilon_min = 0.0;
        // Without the boost the lower key "a" would win the tie.
        let arms = vec![arm("a", 0, 0), learned("z")];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let selection = p
            .select_with(BanditAlgorithm::EpsilonGreedy, &arms, Utc::now(), &mut rng)
            .unwrap();
        assert_eq!(selection.key, "z");
        assert!((selection.score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_boost_tilts_thompson_towards_learned_arm() {
        let arms = vec![arm("a", 0, 0), learned("z")];
        let now = Utc::now();
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let wins = (0..400)
            .filter(|_| {
                policy()
                    .select_with(BanditAlgorithm::ThompsonSampling, &arms, now, &mut rng)
                    .is_some_and(|s| s.key == "z")
            })
            .count();
        // P(U + 0.2 > V) = 0.68 for independent uniforms.
        assert!(wins > 230, "learned arm won {} of 400", wins);
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(policy().select(&[], Utc::now(), &mut rng).is_none());
    }
}
