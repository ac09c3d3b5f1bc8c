//! Decision session: the result of one `decide` call.
//!
//! A session carries everything considered along the way (seed, paths,
//! verdicts, the chosen path) plus a stage trace of every decision point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::aha::AhaReason;
use super::bandit::BanditAlgorithm;
use super::types::{Context, Fingerprint, Path, PathOrigin, Verdict, VerificationReport};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Seed,
    SeedVerify,
    PathExpand,
    PathVerify,
    Converge,
}

impl Stage {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Seed => "seed",
            Stage::SeedVerify => "seed_verify",
            Stage::PathExpand => "path_expand",
            Stage::PathVerify => "path_verify",
            Stage::Converge => "converge",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened at a decision point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// S1 produced a seed.
    SeedGenerated {
        attempt: u32,
        /// The collaborator failed and the minimal seed was used.
        fallback: bool,
    },
    /// S2 judged a seed.
    SeedVerified {
        attempt: u32,
        verdict: Verdict,
    },
    /// Every seed attempt failed verification; the last seed is kept.
    SeedLowConfidence {
        attempts: u32,
    },
    /// S3 filled the pool for a round.
    PathsExpanded {
        round: u32,
        golden: usize,
        generated: usize,
        pool_size: usize,
    },
    /// S4 verdict for one path, with its updated confidence.
    PathVerified {
        round: u32,
        path_id: String,
        fingerprint: Fingerprint,
        origin: PathOrigin,
        verdict: Verdict,
        /// The verifier missed its deadline; the verdict is uncertain.
        timed_out: bool,
        confidence: f64,
    },
    /// The pool deadlocked and creative paths were injected.
    AhaTriggered {
        reasons: Vec<AhaReason>,
        /// Creative paths added to the pool.
        injected: usize,
    },
    /// S5 chose a path.
    Converged {
        algorithm: BanditAlgorithm,
        path_id: String,
        fingerprint: Fingerprint,
        origin: PathOrigin,
        convergence_level: f64,
        /// Epsilon-greedy took a random step.
        explored: bool,
    },
    /// No path cleared the confidence floor, even after the bypass.
    NoConfidentDecision {
        reason: String,
    },
    /// The caller cancelled the session.
    Cancelled,
}

/// One entry of the stage trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage: Stage,
    #[serde(flatten)]
    pub event: TraceEvent,
    pub at: DateTime<Utc>,
}

/// How the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// A path was chosen.
    Decided,
    /// No path was confident even after the aha bypass.
    NoConfidentDecision,
    /// The caller cancelled the session.
    Cancelled,
}

/// A path's verification record within the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathVerification {
    pub path_id: String,
    pub report: VerificationReport,
}

/// Result of one decision call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSession {
    pub id: String,
    pub query: String,
    pub context: Context,
    pub seed: String,
    /// Seed stayed infeasible after all retries.
    pub seed_low_confidence: bool,
    /// Paths considered, in pool order.
    pub paths: Vec<Path>,
    pub verifications: Vec<PathVerification>,
    pub chosen: Option<Path>,
    pub outcome: DecisionOutcome,
    pub trace: Vec<TraceEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DecisionSession {
    /// Start an empty session.
    pub fn new(query: impl Into<String>, context: Context) -> Self {
        Self {
            id: format!("session_{}", uuid::Uuid::new_v4()),
            query: query.into(),
            context,
            seed: String::new(),
            seed_low_confidence: false,
            paths: Vec::new(),
            verifications: Vec::new(),
            chosen: None,
            outcome: DecisionOutcome::NoConfidentDecision,
            trace: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Append a trace entry.
    pub fn record(&mut self, stage: Stage, event: TraceEvent) {
        self.trace.push(TraceEntry {
            stage,
            event,
            at: Utc::now(),
        });
    }

    /// Mark the session finished.
    pub fn finish(&mut self, outcome: DecisionOutcome) {
        self.outcome = outcome;
        self.completed_at = Some(Utc::now());
    }

    /// Whether a path was chosen.
    pub fn is_decided(&self) -> bool {
        self.outcome == DecisionOutcome::Decided && self.chosen.is_some()
    }

    /// Verdict recorded for a path.
    pub fn verdict_for(&self, path_id: &str) -> Option<Verdict> {
        self.verifications
            .iter()
            .find(|v| v.path_id == path_id)
            .map(|v| v.report.verdict)
    }

    /// Origins of the converged paths, in trace order.
    pub fn trace_origins(&self) -> Vec<PathOrigin> {
        self.trace
            .iter()
            .filter_map(|entry| match &entry.event {
                TraceEvent::Converged { origin, .. } => Some(*origin),
                _ => None,
            })
            .collect()
    }

    /// Number of aha triggers in this session.
    pub fn aha_triggers(&self) -> usize {
        self.trace
            .iter()
            .filter(|entry| matches!(entry.event, TraceEvent::AhaTriggered { .. }))
            .count()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let elapsed_ms = self
            .completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or(0);
        let algorithm = self.trace.iter().rev().find_map(|entry| match &entry.event {
            TraceEvent::Converged { algorithm, .. } => Some(*algorithm),
            _ => None,
        });
        match (&self.outcome, &self.chosen) {
            (DecisionOutcome::Decided, Some(path)) => format!(
                "decided [{}] {} (origin {}, confidence {:.2}, {}) from {} paths in {}ms",
                path.path_type,
                path.description,
                path.origin,
                path.confidence,
                algorithm.map(|a| a.as_str()).unwrap_or("unknown"),
                self.paths.len(),
                elapsed_ms
            ),
            (DecisionOutcome::Cancelled, _) => format!(
                "cancelled after {} paths in {}ms",
                self.paths.len(),
                elapsed_ms
            ),
            _ => format!(
                "no confident decision from {} paths ({} aha triggers) in {}ms",
                self.paths.len(),
                self.aha_triggers(),
                elapsed_ms
            ),
        }
    }
}
