//! Candidate paths for one decision session.
//!
//! The pool keeps insertion order, deduplicates by fingerprint, and tracks
//! which round (0 for the initial expansion, 1+ for aha injections) each path
//! entered in, along with its verification report.

use std::collections::HashMap;

use super::types::{Fingerprint, Path, PathOrigin, Verdict, VerificationReport};

/// One path plus its provenance within the session.
#[derive(Debug, Clone)]
struct PoolEntry {
    path: Path,
    round: u32,
    report: Option<VerificationReport>,
}

/// Ordered, fingerprint-unique set of candidate paths.
#[derive(Debug, Clone, Default)]
pub struct PathPool {
    entries: Vec<PoolEntry>,
    index: HashMap<Fingerprint, usize>,
}

impl PathPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path in the given round.
    ///
    /// A duplicate fingerprint is dropped, except that a golden path replaces
    /// an unverified normal one so reuse is attributed to the template.
    /// Returns whether the pool changed.
    pub fn insert(&mut self, path: Path, round: u32) -> bool {
        if let Some(&idx) = self.index.get(&path.fingerprint) {
            let existing = &mut self.entries[idx];
            if path.origin == PathOrigin::Golden
                && existing.path.origin != PathOrigin::Golden
                && existing.report.is_none()
            {
                existing.path.origin = PathOrigin::Golden;
                return true;
            }
            return false;
        }
        self.index.insert(path.fingerprint.clone(), self.entries.len());
        self.entries.push(PoolEntry {
            path,
            round,
            report: None,
        });
        true
    }

    /// Record the verifier's report for a path.
    pub fn record_verification(&mut self, path_id: &str, report: VerificationReport) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.path.id == path_id) {
            entry.report = Some(report);
        }
    }

    /// Overwrite a path's confidence.
    pub fn set_confidence(&mut self, path_id: &str, confidence: f64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.path.id == path_id) {
            entry.path.confidence = confidence.clamp(0.0, 1.0);
        }
    }

    /// Verdict recorded for a path, if verified.
    pub fn verdict(&self, path_id: &str) -> Option<Verdict> {
        self.entries
            .iter()
            .find(|e| e.path.id == path_id)
            .and_then(|e| e.report.as_ref().map(|r| r.verdict))
    }

    /// Paths not yet verified.
    pub fn unverified(&self) -> Vec<Path> {
        self.entries
            .iter()
            .filter(|e| e.report.is_none())
            .map(|e| e.path.clone())
            .collect()
    }

    /// Paths that may still win: everything not judged infeasible.
    pub fn eligible(&self) -> Vec<Path> {
        self.entries
            .iter()
            .filter(|e| !matches!(e.report.as_ref().map(|r| r.verdict), Some(Verdict::Infeasible)))
            .map(|e| e.path.clone())
            .collect()
    }

    /// Paths from one round.
    pub fn round(&self, round: u32) -> Vec<Path> {
        self.entries
            .iter()
            .filter(|e| e.round == round)
            .map(|e| e.path.clone())
            .collect()
    }

    /// Paths with the given origin.
    pub fn by_origin(&self, origin: PathOrigin) -> Vec<Path> {
        self.entries
            .iter()
            .filter(|e| e.path.origin == origin)
            .map(|e| e.path.clone())
            .collect()
    }

    /// Look up a path by id.
    pub fn get(&self, path_id: &str) -> Option<&Path> {
        self.entries
            .iter()
            .map(|e| &e.path)
            .find(|p| p.id == path_id)
    }

    /// Look up a path by fingerprint.
    pub fn by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<&Path> {
        self.index.get(fingerprint).map(|&idx| &self.entries[idx].path)
    }

    /// All paths in insertion order.
    pub fn paths(&self) -> Vec<Path> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// Confidences in insertion order.
    pub fn confidences(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.path.confidence).collect()
    }

    /// Recorded verdicts, in insertion order, skipping unverified paths.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.entries
            .iter()
            .filter_map(|e| e.report.as_ref().map(|r| r.verdict))
            .collect()
    }

    /// `(path id, report)` pairs for verified paths.
    pub fn reports(&self) -> Vec<(String, VerificationReport)> {
        self.entries
            .iter()
            .filter_map(|e| e.report.clone().map(|r| (e.path.id.clone(), r)))
            .collect()
    }

    /// Number of paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
