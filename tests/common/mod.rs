//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use metacog_decision::collaborators::{Collaborators, PathProposer, SeedGenerator, Verifier};
use metacog_decision::engine::{Context, GenerationMode, PathDraft, Verdict, VerificationReport};
use metacog_decision::error::CollaboratorResult;
use metacog_decision::{Config, DecisionEngine, LearningState};

pub struct FixedSeed(pub String);

#[async_trait]
impl SeedGenerator for FixedSeed {
    async fn generate(&self, _query: &str, _context: &Context) -> CollaboratorResult<String> {
        Ok(self.0.clone())
    }
}

/// Judges candidates containing any of `rejected` infeasible.
pub struct KeywordVerifier {
    pub rejected: Vec<String>,
    pub calls: AtomicUsize,
}

impl KeywordVerifier {
    pub fn rejecting(words: &[&str]) -> Self {
        Self {
            rejected: words.iter().map(|w| w.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Verifier for KeywordVerifier {
    async fn check(&self, candidate: &str, _context: &Context) -> CollaboratorResult<VerificationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = if self.rejected.iter().any(|w| candidate.contains(w.as_str())) {
            Verdict::Infeasible
        } else {
            Verdict::Feasible
        };
        Ok(VerificationReport::new(verdict))
    }
}

pub struct ScriptedProposer {
    pub normal: Vec<PathDraft>,
    pub creative: Vec<PathDraft>,
}

impl ScriptedProposer {
    pub fn new(normal: &[(&str, &str)], creative: &[(&str, &str)]) -> Self {
        Self {
            normal: drafts(normal),
            creative: drafts(creative),
        }
    }
}

fn drafts(items: &[(&str, &str)]) -> Vec<PathDraft> {
    items.iter().map(|(t, d)| PathDraft::new(*t, *d)).collect()
}

#[async_trait]
impl PathProposer for ScriptedProposer {
    async fn propose(
        &self,
        _seed: &str,
        _context: &Context,
        mode: GenerationMode,
        k: usize,
    ) -> CollaboratorResult<Vec<PathDraft>> {
        let drafts = match mode {
            GenerationMode::Normal => &self.normal,
            GenerationMode::Creative => &self.creative,
        };
        Ok(drafts.iter().take(k).cloned().collect())
    }
}

pub fn test_config(seed: u64) -> Config {
    let mut config = Config::default();
    config.bandit.seed = Some(seed);
    config.request.retry_delay_ms = 1;
    config
}

pub fn collaborators(seed: &str, verifier: KeywordVerifier, proposer: ScriptedProposer) -> Collaborators {
    Collaborators::new(
        Arc::new(FixedSeed(seed.to_string())),
        Arc::new(verifier),
        Arc::new(proposer),
    )
}

pub fn engine(config: Config, collaborators: Collaborators, state: LearningState) -> DecisionEngine {
    DecisionEngine::new(config, collaborators, state).expect("valid config")
}
