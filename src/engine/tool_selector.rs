//! Hybrid tool selection with cold-start detection.
//!
//! For each invocation every relevant tool is assessed for cold start. If any
//! of them is cold, the best-matching cold tool is picked (Exploration Mode);
//! otherwise the bandit picks among the relevant tools (Experience Mode). Either
//! way the invocation outcome updates the tool's statistics, so a tool
//! explored enough graduates to Experience Mode.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::bandit::{BanditAlgorithm, BanditPolicy};
use super::statistics::{ArmLabel, StatisticsStore, ToolStatistics};
use super::types::{word_similarity, FeedbackSource, Outcome};
use crate::collaborators::{call_with_retry, RetryPolicy, ToolCatalog, ToolDescriptor, ToolInvocation};
use crate::config::{ColdStartConfig, Config};
use crate::error::{CollaboratorError, CollaboratorResult, FeedbackResult};

/// Tools scoring at least this share of the best semantic score compete.
pub const RELEVANCE_RATIO: f64 = 0.5;

/// Which layer picks the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// Bandit over tool statistics.
    Experience,
    /// Semantic matching against capability tags.
    Exploration,
}

impl std::fmt::Display for ToolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolMode::Experience => write!(f, "experience"),
            ToolMode::Exploration => write!(f, "exploration"),
        }
    }
}

/// Normalized deficits, each in [0, 1]; higher means colder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColdStartFactors {
    pub usage: f64,
    pub reliability: f64,
    pub recency: f64,
    pub samples: f64,
}

/// Cold-start verdict for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColdStartAssessment {
    pub tool_id: String,
    pub score: f64,
    pub factors: ColdStartFactors,
    pub mode: ToolMode,
    pub reason: String,
}

/// Compute the cold-start assessment from a tool's statistics.
pub fn assess_cold_start(
    stats: &ToolStatistics,
    config: &ColdStartConfig,
    now: DateTime<Utc>,
) -> ColdStartAssessment {
    let usage = (1.0 - stats.selections as f64 / config.min_usage_count.max(1) as f64).max(0.0);

    let adjusted_reliability = if stats.pulls >= 3 {
        stats.success_rate() * (stats.pulls as f64 / 10.0).min(1.0)
    } else {
        0.0
    };
    let reliability = (1.0 - adjusted_reliability / config.min_reliability.max(0.1)).max(0.0);

    let recency = match stats.last_used {
        Some(last) => {
            let idle_hours = (now - last).num_seconds().max(0) as f64 / 3600.0;
            (idle_hours / config.max_idle_hours).min(1.0)
        }
        None => 1.0,
    };

    let samples = (1.0 - stats.pulls as f64 / config.min_sample_size.max(1) as f64).max(0.0);

    let factors = ColdStartFactors {
        usage,
        reliability,
        recency,
        samples,
    };
    let w = &config.weights;
    let score = (w.usage_frequency * usage
        + w.reliability * reliability
        + w.recency * recency
        + w.sample_sufficiency * samples)
        .clamp(0.0, 1.0);

    let mode = if score > config.exploration_threshold {
        ToolMode::Exploration
    } else {
        ToolMode::Experience
    };

    ColdStartAssessment {
        tool_id: stats.key.clone(),
        score,
        factors,
        mode,
        reason: describe(&factors, stats, score, config.exploration_threshold),
    }
}

fn describe(factors: &ColdStartFactors, stats: &ToolStatistics, score: f64, threshold: f64) -> String {
    let mut reasons = Vec::new();
    if factors.usage > 0.7 {
        reasons.push(format!("rarely used ({} selections)", stats.selections));
    }
    if factors.reliability > 0.6 {
        reasons.push("unreliable track record".to_string());
    }
    if factors.recency >= 1.0 {
        reasons.push("idle too long".to_string());
    }
    if factors.samples > 0.7 {
        reasons.push(format!("too few samples ({})", stats.pulls));
    }
    if reasons.is_empty() {
        reasons.push("sufficient history".to_string());
    }
    format!("score {:.2} vs threshold {:.2}: {}", score, threshold, reasons.join(", "))
}

/// Semantic relevance of a tool to a task in [0, 1].
pub fn semantic_match(task: &str, tool: &ToolDescriptor) -> f64 {
    let words: HashSet<String> = tokens(task).collect();
    if words.is_empty() {
        return 0.0;
    }
    let tag_score = if tool.capabilities.is_empty() {
        0.0
    } else {
        let hits = tool
            .capabilities
            .iter()
            .filter(|tag| words.contains(&tag.to_lowercase()))
            .count();
        hits as f64 / tool.capabilities.len() as f64
    };
    let task_text = words.into_iter().collect::<Vec<_>>().join(" ");
    let desc_text = tokens(&tool.description).collect::<Vec<_>>().join(" ");
    tag_score * 0.7 + word_similarity(&task_text, &desc_text) * 0.3
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// The tool picked for one invocation and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    pub tool_id: String,
    pub mode: ToolMode,
    /// Assessment of the chosen tool.
    pub assessment: ColdStartAssessment,
    /// Bandit algorithm used in Experience Mode.
    pub algorithm: Option<BanditAlgorithm>,
    pub semantic_score: f64,
}

/// A tool invocation with the choice that led to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub choice: ToolChoice,
    pub invocation: ToolInvocation,
}

/// Per-invocation experience/exploration tool selector.
pub struct HybridToolSelector {
    catalog: Arc<dyn ToolCatalog>,
    stats: Arc<StatisticsStore>,
    policy: BanditPolicy,
    cold_start: ColdStartConfig,
    retry: RetryPolicy,
    rolling_window: usize,
    rng: Mutex<ChaCha8Rng>,
}

impl HybridToolSelector {
    /// Create a selector over a catalog and shared tool statistics.
    pub fn new(catalog: Arc<dyn ToolCatalog>, stats: Arc<StatisticsStore>, config: &Config) -> Self {
        let rng = match config.bandit.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            catalog,
            stats,
            policy: BanditPolicy::for_tools(&config.bandit),
            cold_start: config.cold_start.clone(),
            retry: RetryPolicy::from_config(&config.request),
            rolling_window: config.golden.rolling_window,
            rng: Mutex::new(rng),
        }
    }

    /// Shared tool statistics.
    pub fn statistics(&self) -> &Arc<StatisticsStore> {
        &self.stats
    }

    /// Cold-start assessment for one tool.
    pub async fn assess(&self, tool_id: &str) -> ColdStartAssessment {
        let stats = self
            .stats
            .get(tool_id)
            .await
            .unwrap_or_else(|| ToolStatistics::new(tool_id));
        assess_cold_start(&stats, &self.cold_start, Utc::now())
    }

    /// Pick a tool for `task`.
    pub async fn select_tool(&self, task: &str) -> CollaboratorResult<ToolChoice> {
        let catalog = self.catalog.clone();
        let tools = call_with_retry("tool_list", &self.retry, None, || {
            let catalog = catalog.clone();
            async move { catalog.list().await }
        })
        .await?;

        let mut ranked: Vec<(f64, ToolDescriptor)> = tools
            .into_iter()
            .map(|tool| (semantic_match(task, &tool), tool))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        let Some(top_score) = ranked.first().map(|(score, _)| *score) else {
            return Err(CollaboratorError::InvalidResponse {
                message: "tool catalog is empty".to_string(),
            });
        };
        let relevant: Vec<(f64, ToolDescriptor)> = if top_score > 0.0 {
            ranked
                .into_iter()
                .filter(|(score, _)| *score >= top_score * RELEVANCE_RATIO)
                .collect()
        } else {
            ranked
        };

        let now = Utc::now();
        let arms = self
            .stats
            .snapshot_many(relevant.iter().map(|(_, tool)| tool.id.as_str()))
            .await;
        let assessments: Vec<ColdStartAssessment> = arms
            .iter()
            .map(|arm| assess_cold_start(arm, &self.cold_start, now))
            .collect();
        for assessment in &assessments {
            debug!(
                tool = %assessment.tool_id,
                score = assessment.score,
                mode = %assessment.mode,
                reason = %assessment.reason,
                "Cold-start assessment"
            );
        }

        // Any cold competitor forces exploration; `relevant` is in semantic
        // order, so the first cold one is the best match.
        if let Some(index) = assessments.iter().position(|a| a.mode == ToolMode::Exploration) {
            let assessment = assessments[index].clone();
            info!(
                tool = %assessment.tool_id,
                score = assessment.score,
                reason = %assessment.reason,
                candidates = relevant.len(),
                "Cold tool selected by semantic match"
            );
            return Ok(ToolChoice {
                tool_id: assessment.tool_id.clone(),
                mode: ToolMode::Exploration,
                assessment,
                algorithm: None,
                semantic_score: relevant[index].0,
            });
        }

        let selection = {
            let mut rng = self.rng.lock().await;
            self.policy.select(&arms, now, &mut *rng)
        };
        let Some((_, selection)) = selection else {
            return Err(CollaboratorError::InvalidResponse {
                message: "no relevant tool to select".to_string(),
            });
        };
        let index = relevant
            .iter()
            .position(|(_, tool)| tool.id == selection.key)
            .unwrap_or(0);

        info!(
            tool = %selection.key,
            algorithm = %selection.algorithm,
            candidates = relevant.len(),
            "Experience mode selection"
        );
        Ok(ToolChoice {
            tool_id: selection.key,
            mode: ToolMode::Experience,
            assessment: assessments[index].clone(),
            algorithm: Some(selection.algorithm),
            semantic_score: relevant[index].0,
        })
    }

    /// Select a tool, invoke it, and record the outcome.
    ///
    /// A call that fails after retries is recorded as a failure and the error
    /// is returned.
    pub async fn invoke(&self, task: &str, params: &serde_json::Value) -> CollaboratorResult<ToolOutcome> {
        let choice = self.select_tool(task).await?;
        let catalog = self.catalog.clone();
        let tool_id = choice.tool_id.clone();
        let result = call_with_retry("tool_invoke", &self.retry, None, || {
            let catalog = catalog.clone();
            let tool_id = tool_id.clone();
            let params = params.clone();
            async move { catalog.invoke(&tool_id, &params).await }
        })
        .await;

        let success = matches!(&result, Ok(invocation) if invocation.success);
        if let Err(e) = self.record_outcome(&choice.tool_id, Outcome::from(success)).await {
            warn!(tool = %choice.tool_id, error = %e, "Tool outcome not recorded");
        }

        let invocation = result?;
        info!(
            tool = %choice.tool_id,
            mode = %choice.mode,
            success = invocation.success,
            "Tool invoked"
        );
        Ok(ToolOutcome { choice, invocation })
    }

    /// Record a tool outcome; counts as both a selection and a pull.
    pub async fn record_outcome(&self, tool_id: &str, outcome: Outcome) -> FeedbackResult<ToolStatistics> {
        let reward = if outcome.is_success() { 1.0 } else { -1.0 };
        let epsilon_policy = &self.policy;
        let rolling_window = self.rolling_window;
        self.stats
            .update(tool_id, |stats| {
                if stats.label.is_none() {
                    stats.label = Some(ArmLabel {
                        kind: "tool".to_string(),
                        description: tool_id.to_string(),
                    });
                }
                stats.selections += 1;
                let epsilon = epsilon_policy.epsilon(stats.pulls + 1);
                stats.record(
                    outcome,
                    reward,
                    FeedbackSource::Execution,
                    Utc::now(),
                    rolling_window,
                    epsilon,
                );
                stats.clone()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticToolCatalog;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.bandit.seed = Some(11);
        config.request.retry_delay_ms = 1;
        config
    }

    fn selector(catalog: StaticToolCatalog) -> HybridToolSelector {
        HybridToolSelector::new(
            Arc::new(catalog),
            Arc::new(StatisticsStore::new("tools", Duration::from_millis(200))),
            &config(),
        )
    }

    fn history(successes: u64, failures: u64, last_used: DateTime<Utc>) -> ToolStatistics {
        let mut stats = ToolStatistics::new("tool");
        for i in 0..successes + failures {
            stats.selections += 1;
            stats.record(Outcome::from(i < successes), 1.0, FeedbackSource::Execution, last_used, 10, 0.1);
        }
        stats
    }

    #[test]
    fn test_zero_pulls_scores_maximum() {
        let a = assess_cold_start(&ToolStatistics::new("t"), &ColdStartConfig::default(), Utc::now());
        assert_eq!(a.score, 1.0);
        assert_eq!(a.mode, ToolMode::Exploration);
    }

    #[test]
    fn test_experienced_reliable_tool_is_warm() {
        let now = Utc::now();
        let a = assess_cold_start(&history(9, 1, now), &ColdStartConfig::default(), now);
        assert!(a.score < 0.1, "score was {}", a.score);
        assert_eq!(a.mode, ToolMode::Experience);
    }

    #[test]
    fn test_idle_tool_gets_recency_deficit() {
        let now = Utc::now();
        let idle = history(9, 1, now - chrono::Duration::hours(200));
        let a = assess_cold_start(&idle, &ColdStartConfig::default(), now);
        assert_eq!(a.factors.recency, 1.0);
        assert!((a.score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_score_stays_in_unit_interval_and_ignores_factor_order() {
        let config = ColdStartConfig::default();
        let now = Utc::now();
        for successes in 0..8 {
            for failures in 0..8 {
                let a = assess_cold_start(&history(successes, failures, now), &config, now);
                assert!((0.0..=1.0).contains(&a.score));

                let w = &config.weights;
                let f = a.factors;
                let reversed = w.sample_sufficiency * f.samples
                    + w.recency * f.recency
                    + w.reliability * f.reliability
                    + w.usage_frequency * f.usage;
                assert!((reversed.clamp(0.0, 1.0) - a.score).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_semantic_match_prefers_tag_overlap() {
        let search = ToolDescriptor::new("web_search", &["search", "web"], "search the web");
        let calc = ToolDescriptor::new("calculator", &["math"], "evaluate arithmetic");
        let task = "search the web for rust news";
        assert!(semantic_match(task, &search) > semantic_match(task, &calc));
    }

    #[tokio::test]
    async fn test_cold_tool_selected_by_exploration() {
        let s = selector(StaticToolCatalog::builtin());
        let choice = s.select_tool("calculate the sum of these numbers").await.unwrap();
        assert_eq!(choice.mode, ToolMode::Exploration);
        assert_eq!(choice.tool_id, "calculator");
        assert!(choice.algorithm.is_none());
    }

    #[tokio::test]
    async fn test_cold_competitor_forces_exploration() {
        let s = selector(StaticToolCatalog::new(vec![
            ToolDescriptor::new("alpha_search", &["search", "web"], "search the web"),
            ToolDescriptor::new("beta_search", &["search", "web"], "search the web"),
        ]));
        for _ in 0..10 {
            s.record_outcome("alpha_search", Outcome::Success).await.unwrap();
        }
        assert_eq!(s.assess("alpha_search").await.mode, ToolMode::Experience);

        let choice = s.select_tool("search the web").await.unwrap();
        assert_eq!(choice.mode, ToolMode::Exploration);
        assert_eq!(choice.tool_id, "beta_search");
        assert_eq!(choice.assessment.tool_id, "beta_search");
    }

    #[tokio::test]
    async fn test_all_warm_candidates_use_bandit() {
        let s = selector(StaticToolCatalog::new(vec![
            ToolDescriptor::new("alpha_search", &["search", "web"], "search the web"),
            ToolDescriptor::new("beta_search", &["search", "web"], "search the web"),
        ]));
        for tool in ["alpha_search", "beta_search"] {
            for _ in 0..10 {
                s.record_outcome(tool, Outcome::Success).await.unwrap();
            }
        }

        let choice = s.select_tool("search the web").await.unwrap();
        assert_eq!(choice.mode, ToolMode::Experience);
        assert!(choice.algorithm.is_some());
        assert_eq!(choice.assessment.tool_id, choice.tool_id);
    }

    #[tokio::test]
    async fn test_exploration_outcomes_graduate_tool() {
        let s = selector(StaticToolCatalog::builtin());
        let task = "calculate the sum of these numbers";
        let mut modes = Vec::new();
        for _ in 0..12 {
            let outcome = s.invoke(task, &serde_json::json!({"expr": "1+2"})).await.unwrap();
            modes.push(outcome.choice.mode);
        }
        assert_eq!(modes[0], ToolMode::Exploration);
        assert_eq!(*modes.last().unwrap(), ToolMode::Experience);

        let stats = s.statistics().get("calculator").await.unwrap();
        assert_eq!(stats.pulls, stats.successes + stats.failures);
        assert!(stats.pulls >= 1);
    }

    #[tokio::test]
    async fn test_failed_invocation_is_recorded() {
        let s = selector(StaticToolCatalog::builtin().with_failing(&["summarizer"]));
        let outcome = s
            .invoke("summarize this document", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(!outcome.invocation.success);
        let stats = s.statistics().get("summarizer").await.unwrap();
        assert_eq!(stats.failures, 1);
    }
}
