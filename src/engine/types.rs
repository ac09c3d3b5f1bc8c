//! Core value types shared across the decision engine.
//!
//! - [`Path`]: a candidate reasoning strategy (a bandit arm)
//! - [`Fingerprint`]: content-derived key used for statistics and templates
//! - [`Verdict`]: the verifier's feasibility judgement
//! - [`FeedbackEvent`]: one outcome observation fed back into the learner

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Free-form context passed along with a query to every collaborator.
pub type Context = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Fingerprint
// ============================================================================

/// Stable content hash of a path's type and normalized description.
///
/// Ordering is lexicographic on the hex string and is used as the final
/// deterministic tie-break during arm selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    /// Fingerprint a path by its strategy family and description.
    pub fn of(path_type: &str, description: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path_type.trim().to_lowercase().as_bytes());
        hasher.update(b"::");
        hasher.update(normalize_text(description).as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Self(hex)
    }

    /// Borrow the fingerprint as a statistics key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaccard similarity over lowercase word sets.
pub fn word_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;

    let words_a: HashSet<String> = a.split_whitespace().map(|w| w.to_lowercase()).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

// ============================================================================
// Paths
// ============================================================================

/// Where a path in the pool came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathOrigin {
    /// Produced by the proposer in normal generation mode.
    Normal,
    /// Reused from a promoted golden template.
    Golden,
    /// Injected by the aha-moment creative bypass.
    Aha,
}

impl PathOrigin {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PathOrigin::Normal => "normal",
            PathOrigin::Golden => "golden",
            PathOrigin::Aha => "aha",
        }
    }
}

impl std::fmt::Display for PathOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unverified path proposal returned by a [`PathProposer`](crate::collaborators::PathProposer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathDraft {
    /// Strategy family label, e.g. "systematic".
    pub path_type: String,
    /// What the strategy does.
    pub description: String,
    /// Proposer's own confidence, if it gave one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl PathDraft {
    /// Create a draft without a proposer confidence.
    pub fn new(path_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            path_type: path_type.into(),
            description: description.into(),
            confidence: None,
        }
    }
}

/// A candidate reasoning strategy for one decision session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Unique per session, e.g. `path_<uuid>`.
    pub id: String,
    /// Strategy family label.
    pub path_type: String,
    pub description: String,
    /// Stable identity across sessions; keys the path statistics.
    pub fingerprint: Fingerprint,
    /// Current confidence in [0, 1].
    pub confidence: f64,
    /// How the path entered the pool.
    pub origin: PathOrigin,
}

impl Path {
    /// Materialize a draft into a path with a fresh id.
    pub fn from_draft(draft: &PathDraft, origin: PathOrigin) -> Self {
        Self {
            id: format!("path_{}", uuid::Uuid::new_v4()),
            path_type: draft.path_type.clone(),
            description: draft.description.clone(),
            fingerprint: Fingerprint::of(&draft.path_type, &draft.description),
            confidence: draft.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            origin,
        }
    }

    /// Text handed to the verifier for this path.
    pub fn candidate_text(&self) -> String {
        format!("[{}] {}", self.path_type, self.description)
    }
}

/// Generation mode requested from the path proposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Conventional strategies for the regular pool.
    Normal,
    /// Unconventional strategies for the aha-moment bypass.
    Creative,
}

// ============================================================================
// Verification
// ============================================================================

/// Feasibility judgement from the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Feasible,
    Infeasible,
    /// Neither; also the verdict for timed-out or failed verification.
    Uncertain,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Feasible => write!(f, "feasible"),
            Verdict::Infeasible => write!(f, "infeasible"),
            Verdict::Uncertain => write!(f, "uncertain"),
        }
    }
}

/// Verdict plus supporting evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub verdict: Verdict,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl VerificationReport {
    /// Report with no evidence attached.
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            evidence: Vec::new(),
        }
    }

    /// Attach a piece of evidence.
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

// ============================================================================
// Feedback
// ============================================================================

/// Binary outcome of using a path or tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Whether this outcome counts as a success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Which stream an observation came from.
///
/// Both streams share one update channel; the tag is kept on the statistics
/// so they can be weighted separately later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    /// Instant learning from S4 verification.
    Verification,
    /// Real-world execution reported by the caller.
    Execution,
}

/// A single outcome observation with an identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Deduplication id; a repeat is rejected.
    pub event_id: String,
    /// Statistics key: a path fingerprint or a tool id.
    pub key: String,
    pub outcome: Outcome,
    /// Signed reward, positive for success.
    pub reward: f64,
    pub source: FeedbackSource,
    /// Observation time, used for staleness decay.
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackEvent {
    /// Create a new event with a fresh id.
    pub fn new(
        key: impl Into<String>,
        outcome: Outcome,
        reward: f64,
        source: FeedbackSource,
    ) -> Self {
        Self {
            event_id: format!("fb_{}", uuid::Uuid::new_v4()),
            key: key.into(),
            outcome,
            reward,
            source,
            recorded_at: Utc::now(),
        }
    }

    /// Execution feedback for a path fingerprint.
    pub fn execution(fingerprint: &Fingerprint, outcome: Outcome, reward: f64) -> Self {
        Self::new(fingerprint.as_str(), outcome, reward, FeedbackSource::Execution)
    }
}
