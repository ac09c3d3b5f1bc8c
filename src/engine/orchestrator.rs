//! Five-stage decision pipeline.
//!
//! ```text
//! S1 Seed ──► S2 Seed-Verify ──► S3 Path-Expand ──► S4 Path-Verify ──► S5 Converge
//!   ▲              │ infeasible                                │
//!   └──────────────┘ (at most N times)            aha bypass ──┘ (one creative round)
//! ```
//!
//! Collaborator failures never escape `decide`: seeds fall back to a minimal
//! heuristic seed, failed or timed-out verifications count as uncertain, and
//! an empty proposal is a degenerate but valid pool. The only terminal
//! outcomes are a chosen path, an explicit "no confident decision", or
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aha::{AhaStats, AhaTrigger};
use super::bandit::ConvergenceReport;
use super::converger::{FeedbackReceipt, MabConverger};
use super::path_pool::PathPool;
use super::session::{DecisionOutcome, DecisionSession, PathVerification, Stage, TraceEvent};
use super::state::LearningState;
use super::types::{
    Context, FeedbackEvent, Fingerprint, GenerationMode, Outcome, Path, PathDraft, PathOrigin,
    Verdict, VerificationReport,
};
use crate::collaborators::heuristic::minimal_seed;
use crate::collaborators::{call_with_retry, Collaborators, RetryPolicy, Verifier};
use crate::config::Config;
use crate::error::{AppResult, CollaboratorError, CollaboratorResult, FeedbackError, FeedbackResult};

/// What a piece of execution feedback refers to.
#[derive(Debug, Clone, Copy)]
pub enum FeedbackTarget<'a> {
    /// The path chosen by a session. Accepted once per session.
    Session(&'a DecisionSession),
    /// A path fingerprint directly.
    Fingerprint(&'a Fingerprint),
}

/// The session was cancelled; unwinds the pipeline.
struct Cancelled;

/// Runs decision sessions over shared learning state.
pub struct DecisionEngine {
    config: Config,
    collaborators: Collaborators,
    state: LearningState,
    converger: MabConverger,
    aha: Mutex<AhaTrigger>,
    retry: RetryPolicy,
    verification_slots: Arc<Semaphore>,
}

impl DecisionEngine {
    /// Create an engine. Invalid configuration is rejected here, never at
    /// decision time.
    pub fn new(config: Config, collaborators: Collaborators, state: LearningState) -> AppResult<Self> {
        config.validate()?;
        let converger = MabConverger::new(
            state.paths.clone(),
            state.golden.clone(),
            state.feedback.clone(),
            &config.bandit,
        );
        Ok(Self {
            aha: Mutex::new(AhaTrigger::new(config.aha.clone())),
            retry: RetryPolicy::from_config(&config.request),
            verification_slots: Arc::new(Semaphore::new(config.pipeline.max_concurrent_verifications)),
            converger,
            collaborators,
            state,
            config,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared learning state.
    pub fn state(&self) -> &LearningState {
        &self.state
    }

    /// Path converger.
    pub fn converger(&self) -> &MabConverger {
        &self.converger
    }

    /// Aha trigger counters across sessions.
    pub async fn aha_stats(&self) -> AhaStats {
        self.aha.lock().await.stats()
    }

    /// Convergence report over a set of paths.
    pub async fn convergence(&self, paths: &[Path]) -> ConvergenceReport {
        self.converger.convergence(paths).await
    }

    /// Run one decision session.
    pub async fn decide(&self, query: &str, context: Context) -> DecisionSession {
        self.decide_with_cancel(query, context, CancellationToken::new())
            .await
    }

    /// Run one decision session that can be cancelled through `cancel`.
    ///
    /// Verification results that arrived before cancellation are still
    /// applied to the statistics.
    pub async fn decide_with_cancel(
        &self,
        query: &str,
        context: Context,
        cancel: CancellationToken,
    ) -> DecisionSession {
        let mut session = DecisionSession::new(query, context);
        let mut pool = PathPool::new();
        let mut round = self.aha.lock().await.fork();

        info!(session_id = %session.id, query = %session.query, "Decision session started");

        let outcome = match self.run(&mut session, &mut pool, &mut round, &cancel).await {
            Ok(outcome) => outcome,
            Err(Cancelled) => {
                session.record(Stage::Converge, TraceEvent::Cancelled);
                warn!(session_id = %session.id, "Decision session cancelled");
                DecisionOutcome::Cancelled
            }
        };

        round.complete_round();
        {
            let mut ledger = self.aha.lock().await;
            ledger.merge(&round);
            match outcome {
                DecisionOutcome::Decided => ledger.record_outcome(true),
                DecisionOutcome::NoConfidentDecision => ledger.record_outcome(false),
                DecisionOutcome::Cancelled => {}
            }
        }

        session.paths = pool.paths();
        session.verifications = pool
            .reports()
            .into_iter()
            .map(|(path_id, report)| PathVerification { path_id, report })
            .collect();
        session.finish(outcome);

        info!(
            session_id = %session.id,
            outcome = ?session.outcome,
            summary = %session.summary(),
            "Decision session finished"
        );
        session
    }

    async fn run(
        &self,
        session: &mut DecisionSession,
        pool: &mut PathPool,
        round: &mut AhaTrigger,
        cancel: &CancellationToken,
    ) -> Result<DecisionOutcome, Cancelled> {
        session.seed = self.seed_stages(session, cancel).await?;

        self.expand(session, pool, cancel).await?;
        self.verify_round(session, pool, 0, cancel).await?;

        if let Some(reasons) = round.evaluate(&pool.confidences(), &pool.verdicts()) {
            let injected = self
                .inject_creative(session, pool, round.batch_size(), cancel)
                .await?;
            session.record(
                Stage::Converge,
                TraceEvent::AhaTriggered {
                    reasons,
                    injected,
                },
            );
            self.verify_round(session, pool, 1, cancel).await?;
        }

        Ok(self.converge(session, pool).await)
    }

    // ========================================================================
    // S1 / S2
    // ========================================================================

    async fn seed_stages(
        &self,
        session: &mut DecisionSession,
        cancel: &CancellationToken,
    ) -> Result<String, Cancelled> {
        let query = session.query.clone();
        let context = session.context.clone();
        let limit = self.config.pipeline.seed_retry_limit;
        // Seed generation fails soft instead of retrying.
        let seed_policy = RetryPolicy::once(self.retry.timeout);
        let seeder = self.collaborators.seed.clone();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let generated = call_with_retry("seed", &seed_policy, Some(cancel), || {
                seeder.generate(&query, &context)
            })
            .await;

            let (seed, fallback) = match generated {
                Ok(seed) if !seed.trim().is_empty() => (seed, false),
                Ok(_) => {
                    warn!(session_id = %session.id, attempt, "Seed generator returned empty seed");
                    (minimal_seed(&query), true)
                }
                Err(CollaboratorError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    warn!(session_id = %session.id, attempt, error = %e, "Seed generation failed, using minimal seed");
                    (minimal_seed(&query), true)
                }
            };
            session.record(Stage::Seed, TraceEvent::SeedGenerated { attempt, fallback });

            let verdict = match self.verify_text(&seed, &context, cancel).await {
                Ok(report) => report.verdict,
                Err(CollaboratorError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Seed verification failed, treating as uncertain");
                    Verdict::Uncertain
                }
            };
            session.record(Stage::SeedVerify, TraceEvent::SeedVerified { attempt, verdict });

            if verdict != Verdict::Infeasible {
                debug!(session_id = %session.id, attempt, verdict = %verdict, "Seed accepted");
                return Ok(seed);
            }
            if attempt > limit {
                warn!(
                    session_id = %session.id,
                    attempts = attempt,
                    "Seed still infeasible after retries, continuing with low confidence"
                );
                session.seed_low_confidence = true;
                session.record(Stage::SeedVerify, TraceEvent::SeedLowConfidence { attempts: attempt });
                return Ok(seed);
            }
            debug!(session_id = %session.id, attempt, "Seed infeasible, regenerating");
        }
    }

    async fn verify_text(
        &self,
        text: &str,
        context: &Context,
        cancel: &CancellationToken,
    ) -> CollaboratorResult<VerificationReport> {
        verify_candidate(
            self.collaborators.verifier.clone(),
            text.to_string(),
            context.clone(),
            self.retry.clone(),
            self.verification_timeout(),
            cancel.clone(),
        )
        .await
    }

    fn verification_timeout(&self) -> Duration {
        Duration::from_millis(self.config.pipeline.verification_timeout_ms)
    }

    // ========================================================================
    // S3
    // ========================================================================

    async fn expand(
        &self,
        session: &mut DecisionSession,
        pool: &mut PathPool,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let pipeline = &self.config.pipeline;

        let lookup_text = format!("{} {}", session.seed, session.query);
        let matches = self
            .state
            .golden
            .find_matches(&lookup_text, pipeline.golden_match_threshold, pipeline.max_golden_per_pool)
            .await;

        let mut golden = 0;
        for hit in matches {
            let draft = PathDraft {
                path_type: hit.template.path_type.clone(),
                description: hit.template.description.clone(),
                confidence: Some(hit.template.success_rate_at_promotion),
            };
            if pool.insert(Path::from_draft(&draft, PathOrigin::Golden), 0) {
                self.state.golden.record_hit(&hit.template.fingerprint).await;
                debug!(
                    fingerprint = %hit.template.fingerprint,
                    similarity = hit.similarity,
                    "Golden template reused"
                );
                golden += 1;
            }
        }

        let drafts = self
            .propose(session, GenerationMode::Normal, pipeline.path_pool_size, cancel)
            .await?;
        let mut generated = 0;
        for draft in drafts.iter().take(pipeline.path_pool_size) {
            if pool.insert(Path::from_draft(draft, PathOrigin::Normal), 0) {
                generated += 1;
            }
        }

        self.register(pool.round(0)).await;
        session.record(
            Stage::PathExpand,
            TraceEvent::PathsExpanded {
                round: 0,
                golden,
                generated,
                pool_size: pool.len(),
            },
        );
        info!(
            session_id = %session.id,
            golden,
            generated,
            pool_size = pool.len(),
            "Path pool expanded"
        );
        Ok(())
    }

    async fn inject_creative(
        &self,
        session: &mut DecisionSession,
        pool: &mut PathPool,
        batch_size: usize,
        cancel: &CancellationToken,
    ) -> Result<usize, Cancelled> {
        let drafts = self
            .propose(session, GenerationMode::Creative, batch_size, cancel)
            .await?;
        let mut injected = 0;
        for draft in drafts.iter().take(batch_size) {
            if pool.insert(Path::from_draft(draft, PathOrigin::Aha), 1) {
                injected += 1;
            }
        }
        self.register(pool.round(1)).await;
        session.record(
            Stage::PathExpand,
            TraceEvent::PathsExpanded {
                round: 1,
                golden: 0,
                generated: injected,
                pool_size: pool.len(),
            },
        );
        info!(session_id = %session.id, injected, "Creative paths injected");
        Ok(injected)
    }

    async fn propose(
        &self,
        session: &DecisionSession,
        mode: GenerationMode,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathDraft>, Cancelled> {
        let proposer = self.collaborators.proposer.clone();
        let result = call_with_retry("propose", &self.retry, Some(cancel), || {
            proposer.propose(&session.seed, &session.context, mode, k)
        })
        .await;
        match result {
            Ok(drafts) => Ok(drafts),
            Err(CollaboratorError::Cancelled) => Err(Cancelled),
            Err(e) => {
                warn!(session_id = %session.id, mode = ?mode, error = %e, "Path proposal failed, continuing with an empty batch");
                Ok(Vec::new())
            }
        }
    }

    async fn register(&self, paths: Vec<Path>) {
        for path in paths {
            if let Err(e) = self.converger.register_path(&path).await {
                warn!(fingerprint = %path.fingerprint, error = %e, "Path not registered");
            }
        }
    }

    // ========================================================================
    // S4
    // ========================================================================

    /// Verify every unverified path concurrently and apply instant learning.
    ///
    /// Returns only after every dispatched verification has finished, timed
    /// out, or observed cancellation.
    async fn verify_round(
        &self,
        session: &mut DecisionSession,
        pool: &mut PathPool,
        round: u32,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let pending = pool.unverified();
        if pending.is_empty() {
            return Ok(());
        }
        let timeout = self.verification_timeout();
        let mut handles = Vec::with_capacity(pending.len());

        for path in pending {
            let verifier = self.collaborators.verifier.clone();
            let slots = self.verification_slots.clone();
            let retry = self.retry.clone();
            let context = session.context.clone();
            let cancel = cancel.clone();
            let fallback = path.clone();

            handles.push((fallback, tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return (path, Err(CollaboratorError::Cancelled)),
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                path,
                                Err(CollaboratorError::Failed {
                                    message: "verification pool closed".to_string(),
                                }),
                            )
                        }
                    },
                };
                let text = path.candidate_text();
                let result = verify_candidate(verifier, text, context, retry, timeout, cancel).await;
                (path, result)
            })));
        }

        let reward = self.config.pipeline.verification_reward;
        let mut cancelled = false;
        for (fallback, handle) in handles {
            let (path, result) = match handle.await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(session_id = %session.id, path_id = %fallback.id, error = %e, "Verification task panicked");
                    (
                        fallback,
                        Err(CollaboratorError::Failed {
                            message: "verification task failed".to_string(),
                        }),
                    )
                }
            };

            let (report, timed_out) = match result {
                Ok(report) => (report, false),
                Err(CollaboratorError::Cancelled) => {
                    cancelled = true;
                    continue;
                }
                Err(CollaboratorError::Timeout { timeout_ms }) => {
                    warn!(session_id = %session.id, path_id = %path.id, timeout_ms, "Path verification timed out");
                    (
                        VerificationReport::new(Verdict::Uncertain).with_evidence("verification timed out"),
                        true,
                    )
                }
                Err(e) => {
                    warn!(session_id = %session.id, path_id = %path.id, error = %e, "Path verification failed");
                    (
                        VerificationReport::new(Verdict::Uncertain)
                            .with_evidence(format!("verification failed: {}", e)),
                        false,
                    )
                }
            };

            if let Some(event) = MabConverger::verification_event(&path, report.verdict, reward) {
                if let Err(e) = self.converger.apply_feedback(event).await {
                    warn!(fingerprint = %path.fingerprint, error = %e, "Instant learning update dropped");
                }
            }
            let confidence = self.converger.confidence_for(&path, report.verdict).await;
            let verdict = report.verdict;
            pool.record_verification(&path.id, report);
            pool.set_confidence(&path.id, confidence);

            session.record(
                Stage::PathVerify,
                TraceEvent::PathVerified {
                    round,
                    path_id: path.id.clone(),
                    fingerprint: path.fingerprint.clone(),
                    origin: path.origin,
                    verdict,
                    timed_out,
                    confidence,
                },
            );
        }

        if cancelled || cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }

    // ========================================================================
    // S5
    // ========================================================================

    async fn converge(&self, session: &mut DecisionSession, pool: &PathPool) -> DecisionOutcome {
        let floor = self.config.aha.confidence_floor;
        let candidates: Vec<Path> = pool
            .eligible()
            .into_iter()
            .filter(|p| pool.verdict(&p.id).is_some() && p.confidence >= floor)
            .collect();

        let selected = if candidates.is_empty() {
            None
        } else {
            self.converger.select_winner(&candidates).await
        };

        let Some((report, selection)) = selected else {
            let reason = if pool.is_empty() {
                "no candidate paths were proposed"
            } else {
                "no path reached the confidence floor"
            };
            warn!(session_id = %session.id, reason, "No confident decision");
            session.record(
                Stage::Converge,
                TraceEvent::NoConfidentDecision {
                    reason: reason.to_string(),
                },
            );
            return DecisionOutcome::NoConfidentDecision;
        };

        let Some(chosen) = candidates
            .into_iter()
            .find(|p| p.fingerprint.as_str() == selection.key)
        else {
            warn!(session_id = %session.id, key = %selection.key, "Selected key not in pool");
            session.record(
                Stage::Converge,
                TraceEvent::NoConfidentDecision {
                    reason: "selected path missing from pool".to_string(),
                },
            );
            return DecisionOutcome::NoConfidentDecision;
        };

        session.record(
            Stage::Converge,
            TraceEvent::Converged {
                algorithm: selection.algorithm,
                path_id: chosen.id.clone(),
                fingerprint: chosen.fingerprint.clone(),
                origin: chosen.origin,
                convergence_level: report.convergence_level,
                explored: selection.explored,
            },
        );
        session.chosen = Some(chosen);
        DecisionOutcome::Decided
    }

    // ========================================================================
    // Feedback
    // ========================================================================

    /// Report how executing a decision went.
    ///
    /// Session feedback carries a per-session event id, so a second report
    /// for the same session is rejected as a duplicate. It also moves the aha
    /// failure streak.
    pub async fn apply_feedback(
        &self,
        target: FeedbackTarget<'_>,
        outcome: Outcome,
        reward: f64,
    ) -> FeedbackResult<FeedbackReceipt> {
        match target {
            FeedbackTarget::Session(session) => {
                let chosen = session.chosen.as_ref().ok_or_else(|| FeedbackError::NoChosenPath {
                    session_id: session.id.clone(),
                })?;
                let mut event = FeedbackEvent::execution(&chosen.fingerprint, outcome, reward);
                event.event_id = format!("{}:execution", session.id);
                let receipt = self.converger.apply_feedback(event).await?;
                self.aha.lock().await.record_outcome(outcome.is_success());
                Ok(receipt)
            }
            FeedbackTarget::Fingerprint(fingerprint) => {
                self.converger
                    .apply_feedback(FeedbackEvent::execution(fingerprint, outcome, reward))
                    .await
            }
        }
    }

    /// Apply a prebuilt feedback event; repeats of the same event are rejected.
    pub async fn apply_feedback_event(&self, event: FeedbackEvent) -> FeedbackResult<FeedbackReceipt> {
        self.converger.apply_feedback(event).await
    }
}

async fn verify_candidate(
    verifier: Arc<dyn Verifier>,
    text: String,
    context: Context,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
) -> CollaboratorResult<VerificationReport> {
    let attempt = call_with_retry("verify", &retry, Some(&cancel), || verifier.check(&text, &context));
    match tokio::time::timeout(timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{PathProposer, SeedGenerator};
    use crate::engine::types::PathOrigin;
    use async_trait::async_trait;

    struct FixedSeed(&'static str);

    #[async_trait]
    impl SeedGenerator for FixedSeed {
        async fn generate(&self, _query: &str, _context: &Context) -> CollaboratorResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSeed;

    #[async_trait]
    impl SeedGenerator for FailingSeed {
        async fn generate(&self, _query: &str, _context: &Context) -> CollaboratorResult<String> {
            Err(CollaboratorError::Failed {
                message: "model offline".to_string(),
            })
        }
    }

    /// Rejects candidates containing "dead end", stalls on "slow", panics on
    /// "crash".
    struct ScriptedVerifier;

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn check(&self, candidate: &str, _context: &Context) -> CollaboratorResult<VerificationReport> {
            if candidate.contains("crash") {
                panic!("verifier crashed on {}", candidate);
            }
            if candidate.contains("slow") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            let verdict = if candidate.contains("dead end") {
                Verdict::Infeasible
            } else {
                Verdict::Feasible
            };
            Ok(VerificationReport::new(verdict))
        }
    }

    struct ScriptedProposer {
        normal: Vec<PathDraft>,
        creative: Vec<PathDraft>,
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

    fn drafts(items: &[(&str, &str)]) -> Vec<PathDraft> {
        items.iter().map(|(t, d)| PathDraft::new(*t, *d)).collect()
    }

    fn engine_with(config: Config, normal: &[(&str, &str)], creative: &[(&str, &str)]) -> DecisionEngine {
        let collaborators = Collaborators::new(
            Arc::new(FixedSeed("start from the constraints")),
            Arc::new(ScriptedVerifier),
            Arc::new(ScriptedProposer {
                normal: drafts(normal),
                creative: drafts(creative),
            }),
        );
        let state = LearningState::new(&config);
        DecisionEngine::new(config, collaborators, state).unwrap()
    }

    fn seeded_config() -> Config {
        let mut config = Config::default();
        config.bandit.seed = Some(7);
        config.request.retry_delay_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_decides_among_feasible_paths() {
        let engine = engine_with(
            seeded_config(),
            &[("analytical", "measure the hot path"), ("pragmatic", "ship the cache")],
            &[],
        );
        let session = engine.decide("speed up the api", Context::new()).await;

        assert!(session.is_decided());
        assert_eq!(session.paths.len(), 2);
        assert_eq!(session.verifications.len(), 2);
        assert_eq!(session.aha_triggers(), 0);
        assert_eq!(session.trace_origins(), vec![PathOrigin::Normal]);

        for path in &session.paths {
            let stats = engine.state().paths.get(path.fingerprint.as_str()).await.unwrap();
            assert_eq!(stats.pulls, 1);
            assert_eq!(stats.verification_pulls, 1);
        }
    }

    #[tokio::test]
    async fn test_aha_bypass_rescues_deadlocked_pool() {
        let engine = engine_with(
            seeded_config(),
            &[
                ("analytical", "dead end one"),
                ("systematic", "dead end two"),
                ("pragmatic", "dead end three"),
            ],
            &[("lateral", "invert the problem")],
        );
        let session = engine.decide("stuck problem", Context::new()).await;

        assert!(session.is_decided());
        assert_eq!(session.aha_triggers(), 1);
        assert_eq!(session.trace_origins(), vec![PathOrigin::Aha]);
        assert_eq!(session.paths.len(), 4);
        assert_eq!(engine.aha_stats().await.total_triggers, 1);
    }

    #[tokio::test]
    async fn test_no_confident_decision_extends_streak() {
        let engine = engine_with(
            seeded_config(),
            &[("analytical", "dead end one")],
            &[("lateral", "dead end two")],
        );
        let session = engine.decide("hopeless", Context::new()).await;

        assert_eq!(session.outcome, DecisionOutcome::NoConfidentDecision);
        assert!(session.chosen.is_none());
        assert_eq!(session.aha_triggers(), 1);
        assert_eq!(engine.aha_stats().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_proposal_is_not_an_error() {
        let engine = engine_with(seeded_config(), &[], &[]);
        let session = engine.decide("nothing to offer", Context::new()).await;
        assert_eq!(session.outcome, DecisionOutcome::NoConfidentDecision);
        assert!(session.paths.is_empty());
    }

    #[tokio::test]
    async fn test_infeasible_seed_retries_then_continues() {
        let mut config = seeded_config();
        config.pipeline.seed_retry_limit = 2;
        let collaborators = Collaborators::new(
            Arc::new(FixedSeed("dead end seed")),
            Arc::new(ScriptedVerifier),
            Arc::new(ScriptedProposer {
                normal: drafts(&[("pragmatic", "try it anyway")]),
                creative: Vec::new(),
            }),
        );
        let state = LearningState::new(&config);
        let engine = DecisionEngine::new(config, collaborators, state).unwrap();

        let session = engine.decide("q", Context::new()).await;
        let attempts = session
            .trace
            .iter()
            .filter(|e| matches!(e.event, TraceEvent::SeedGenerated { .. }))
            .count();
        assert_eq!(attempts, 3);
        assert!(session.seed_low_confidence);
        assert!(session.is_decided());
    }

    #[tokio::test]
    async fn test_failed_seed_uses_minimal_seed() {
        let config = seeded_config();
        let collaborators = Collaborators::new(
            Arc::new(FailingSeed),
            Arc::new(ScriptedVerifier),
            Arc::new(ScriptedProposer {
                normal: drafts(&[("pragmatic", "do the obvious thing")]),
                creative: Vec::new(),
            }),
        );
        let state = LearningState::new(&config);
        let engine = DecisionEngine::new(config, collaborators, state).unwrap();

        let session = engine.decide("pick a database", Context::new()).await;
        assert_eq!(session.seed, minimal_seed("pick a database"));
        assert!(session.trace.iter().any(|e| matches!(
            e.event,
            TraceEvent::SeedGenerated { fallback: true, .. }
        )));
        assert!(session.is_decided());
    }

    #[tokio::test]
    async fn test_verification_timeout_counts_as_uncertain() {
        let mut config = seeded_config();
        config.pipeline.verification_timeout_ms = 50;
        let engine = engine_with(config, &[("analytical", "slow analysis")], &[]);

        let session = engine.decide("q", Context::new()).await;
        let path = &session.paths[0];
        assert_eq!(session.verdict_for(&path.id), Some(Verdict::Uncertain));
        assert!(session.trace.iter().any(|e| matches!(
            e.event,
            TraceEvent::PathVerified { timed_out: true, .. }
        )));
        // Uncertain verdicts leave statistics untouched.
        let stats = engine.state().paths.get(path.fingerprint.as_str()).await.unwrap();
        assert_eq!(stats.pulls, 0);
    }

    #[tokio::test]
    async fn test_crashed_verification_counts_as_uncertain() {
        let engine = engine_with(
            seeded_config(),
            &[("analytical", "measure the hot path"), ("pragmatic", "crash the service")],
            &[],
        );

        let session = engine.decide("q", Context::new()).await;
        let crashed = session
            .paths
            .iter()
            .find(|p| p.description.contains("crash"))
            .unwrap();
        assert_eq!(session.verdict_for(&crashed.id), Some(Verdict::Uncertain));
        assert_eq!(session.verifications.len(), 2);
        assert!(session.trace.iter().any(|e| matches!(
            &e.event,
            TraceEvent::PathVerified { path_id, verdict: Verdict::Uncertain, timed_out: false, .. }
                if *path_id == crashed.id
        )));
        assert!(session.is_decided());
    }

    #[tokio::test]
    async fn test_cancelled_session() {
        let engine = engine_with(seeded_config(), &[("analytical", "anything")], &[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let session = engine
            .decide_with_cancel("q", Context::new(), cancel)
            .await;
        assert_eq!(session.outcome, DecisionOutcome::Cancelled);
        assert!(session.chosen.is_none());
        assert_eq!(engine.aha_stats().await.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_session_feedback_is_accepted_once() {
        let engine = engine_with(seeded_config(), &[("pragmatic", "ship it")], &[]);
        let session = engine.decide("q", Context::new()).await;

        let receipt = engine
            .apply_feedback(FeedbackTarget::Session(&session), Outcome::Success, 1.0)
            .await
            .unwrap();
        assert_eq!(receipt.pulls, 2);

        let err = engine
            .apply_feedback(FeedbackTarget::Session(&session), Outcome::Success, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_feedback_without_chosen_path() {
        let engine = engine_with(seeded_config(), &[], &[]);
        let session = engine.decide("q", Context::new()).await;
        let err = engine
            .apply_feedback(FeedbackTarget::Session(&session), Outcome::Failure, -1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::NoChosenPath { .. }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.pipeline.path_pool_size = 0;
        let state = LearningState::new(&config);
        assert!(DecisionEngine::new(config, Collaborators::heuristic(), state).is_err());
    }
}
