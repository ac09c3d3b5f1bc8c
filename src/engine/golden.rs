//! Golden template store.
//!
//! A golden template is a path fingerprint whose statistics crossed the
//! promotion rule (`pulls >= min_sample_size` and
//! `success_rate >= promotion_threshold`). Templates are offered to the path
//! pool before normal generation so proven strategies get reused.
//!
//! Demotion uses a lower hysteresis threshold on the rolling success rate and
//! only removes the fast-path entry; the underlying statistics stay.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::statistics::ArmStatistics;
use super::types::{word_similarity, Fingerprint};
use crate::config::GoldenConfig;

/// A promoted, reusable high-performing path pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenTemplate {
    pub fingerprint: Fingerprint,
    pub path_type: String,
    /// Canonical description reused when the template enters a pool.
    pub description: String,
    pub success_rate_at_promotion: f64,
    pub promoted_at: DateTime<Utc>,
    /// Pool entries since promotion.
    pub hit_count: u64,
    pub last_hit_at: Option<DateTime<Utc>>,
}

/// Result of a promotion/demotion evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum GoldenChange {
    Promoted(GoldenTemplate),
    Demoted {
        fingerprint: Fingerprint,
        rolling_success_rate: f64,
    },
    /// A template was removed to make room for a newly promoted one.
    Evicted(Fingerprint),
}

/// A template matched against query/seed text.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub template: GoldenTemplate,
    pub similarity: f64,
    /// Similarity plus the performance bonus; used for ranking.
    pub score: f64,
}

/// Aggregate view of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenSummary {
    pub total_templates: usize,
    pub avg_success_rate: f64,
    pub total_hits: u64,
    pub most_used: Option<Fingerprint>,
}

/// Portable snapshot of the store, used to move templates between
/// deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenExport {
    pub exported_at: DateTime<Utc>,
    /// Summary at export time; informational, ignored on import.
    pub summary: GoldenSummary,
    /// Sorted by fingerprint.
    pub templates: Vec<GoldenTemplate>,
}

/// Shared store of promoted templates.
pub struct GoldenTemplateStore {
    config: GoldenConfig,
    templates: RwLock<HashMap<Fingerprint, GoldenTemplate>>,
}

impl GoldenTemplateStore {
    /// Create an empty store.
    pub fn new(config: GoldenConfig) -> Self {
        Self {
            config,
            templates: RwLock::new(HashMap::new()),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &GoldenConfig {
        &self.config
    }

    /// Run the promotion and demotion rules against a statistics snapshot.
    ///
    /// Callers pass the snapshot produced under the arm's lock and keep that
    /// lock held, so the decision never uses stale data.
    pub async fn evaluate(&self, stats: &ArmStatistics) -> Vec<GoldenChange> {
        let fingerprint = Fingerprint(stats.key.clone());
        let mut templates = self.templates.write().await;

        if templates.contains_key(&fingerprint) {
            if let Some(rolling) = stats.rolling_success_rate() {
                if rolling < self.config.demotion_threshold {
                    templates.remove(&fingerprint);
                    info!(
                        fingerprint = %fingerprint,
                        rolling_success_rate = rolling,
                        threshold = self.config.demotion_threshold,
                        "Golden template demoted"
                    );
                    return vec![GoldenChange::Demoted {
                        fingerprint,
                        rolling_success_rate: rolling,
                    }];
                }
            }
            return Vec::new();
        }

        if !self.qualifies(stats) {
            return Vec::new();
        }
        let Some(label) = stats.label.as_ref() else {
            debug!(fingerprint = %fingerprint, "Qualifying arm has no label, skipping promotion");
            return Vec::new();
        };

        let mut changes = Vec::new();
        if templates.len() >= self.config.max_templates {
            if let Some(evicted) = Self::worst(&templates) {
                templates.remove(&evicted);
                info!(fingerprint = %evicted, "Golden template evicted at capacity");
                changes.push(GoldenChange::Evicted(evicted));
            }
        }

        let template = GoldenTemplate {
            fingerprint: fingerprint.clone(),
            path_type: label.kind.clone(),
            description: label.description.clone(),
            success_rate_at_promotion: stats.success_rate(),
            promoted_at: Utc::now(),
            hit_count: 0,
            last_hit_at: None,
        };
        info!(
            fingerprint = %fingerprint,
            path_type = %template.path_type,
            success_rate = template.success_rate_at_promotion,
            pulls = stats.pulls,
            "Path promoted to golden template"
        );
        templates.insert(fingerprint, template.clone());
        changes.push(GoldenChange::Promoted(template));
        changes
    }

    /// Promotion rule. Never true before `min_sample_size` pulls.
    pub fn qualifies(&self, stats: &ArmStatistics) -> bool {
        if stats.pulls < self.config.min_sample_size {
            return false;
        }
        if stats.success_rate() < self.config.promotion_threshold {
            return false;
        }
        // A demoted arm must recover its recent record before re-promotion.
        stats
            .rolling_success_rate()
            .map_or(true, |rolling| rolling >= self.config.promotion_threshold)
    }

    fn worst(templates: &HashMap<Fingerprint, GoldenTemplate>) -> Option<Fingerprint> {
        templates
            .values()
            .min_by(|a, b| {
                a.success_rate_at_promotion
                    .total_cmp(&b.success_rate_at_promotion)
                    .then_with(|| a.hit_count.cmp(&b.hit_count))
                    .then_with(|| b.fingerprint.cmp(&a.fingerprint))
            })
            .map(|t| t.fingerprint.clone())
    }

    /// Templates whose description is similar enough to `text`, best first.
    pub async fn find_matches(&self, text: &str, threshold: f64, limit: usize) -> Vec<TemplateMatch> {
        let templates = self.templates.read().await;
        let mut matches: Vec<TemplateMatch> = templates
            .values()
            .filter_map(|template| {
                let haystack = format!("{} {}", template.path_type, template.description);
                let similarity = word_similarity(&haystack, text);
                if similarity < threshold {
                    return None;
                }
                let bonus = (template.success_rate_at_promotion - 0.8).clamp(0.0, 0.2);
                Some(TemplateMatch {
                    template: template.clone(),
                    similarity,
                    score: similarity + bonus,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.template.fingerprint.cmp(&b.template.fingerprint))
        });
        matches.truncate(limit);
        matches
    }

    /// Count a reuse of a template.
    pub async fn record_hit(&self, fingerprint: &Fingerprint) {
        if let Some(template) = self.templates.write().await.get_mut(fingerprint) {
            template.hit_count += 1;
            template.last_hit_at = Some(Utc::now());
        }
    }

    /// Insert a template regardless of statistics.
    pub async fn force_promote(&self, template: GoldenTemplate) {
        info!(fingerprint = %template.fingerprint, "Golden template force-promoted");
        self.templates
            .write()
            .await
            .insert(template.fingerprint.clone(), template);
    }

    /// Remove a template; statistics are untouched.
    pub async fn demote(&self, fingerprint: &Fingerprint) -> Option<GoldenTemplate> {
        let removed = self.templates.write().await.remove(fingerprint);
        if removed.is_some() {
            info!(fingerprint = %fingerprint, "Golden template manually demoted");
        }
        removed
    }

    /// Whether a fingerprint is currently golden.
    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.templates.read().await.contains_key(fingerprint)
    }

    /// Look up one template.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<GoldenTemplate> {
        self.templates.read().await.get(fingerprint).cloned()
    }

    /// All templates, sorted by fingerprint.
    pub async fn all(&self) -> Vec<GoldenTemplate> {
        let mut all: Vec<_> = self.templates.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        all
    }

    /// Replace all templates (hydration).
    pub async fn replace_all(&self, templates: Vec<GoldenTemplate>) {
        let mut map = self.templates.write().await;
        map.clear();
        for template in templates {
            map.insert(template.fingerprint.clone(), template);
        }
    }

    /// Snapshot every template with the current summary.
    pub async fn export(&self) -> GoldenExport {
        GoldenExport {
            exported_at: Utc::now(),
            summary: self.summary().await,
            templates: self.all().await,
        }
    }

    /// Load templates from an export and return how many were added.
    ///
    /// With `replace` the store is cleared first; otherwise templates already
    /// present win. The store never grows past `max_templates`; when the
    /// input does not fit, the highest promotion rates are kept.
    pub async fn import(&self, mut templates: Vec<GoldenTemplate>, replace: bool) -> usize {
        templates.sort_by(|a, b| {
            b.success_rate_at_promotion
                .total_cmp(&a.success_rate_at_promotion)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        let mut map = self.templates.write().await;
        if replace {
            map.clear();
        }
        let mut added = 0;
        for template in templates {
            if map.len() >= self.config.max_templates {
                break;
            }
            if map.contains_key(&template.fingerprint) {
                continue;
            }
            map.insert(template.fingerprint.clone(), template);
            added += 1;
        }
        info!(added, total = map.len(), replace, "Golden templates imported");
        added
    }

    /// Number of templates.
    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }

    /// Whether no template is promoted.
    pub async fn is_empty(&self) -> bool {
        self.templates.read().await.is_empty()
    }

    /// Aggregate statistics over the current templates.
    pub async fn summary(&self) -> GoldenSummary {
        let templates = self.templates.read().await;
        let total = templates.len();
        let avg = if total == 0 {
            0.0
        } else {
            templates
                .values()
                .map(|t| t.success_rate_at_promotion)
                .sum::<f64>()
                / total as f64
        };
        let most_used = templates
            .values()
            .filter(|t| t.hit_count > 0)
            .max_by(|a, b| {
                a.hit_count
                    .cmp(&b.hit_count)
                    .then_with(|| b.fingerprint.cmp(&a.fingerprint))
            })
            .map(|t| t.fingerprint.clone());

        GoldenSummary {
            total_templates: total,
            avg_success_rate: avg,
            total_hits: templates.values().map(|t| t.hit_count).sum(),
            most_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::statistics::ArmLabel;
    use crate::engine::types::{FeedbackSource, Outcome};

    fn labelled(key: &str, successes: u64, failures: u64) -> ArmStatistics {
        let mut stats = ArmStatistics::new(key);
        stats.label = Some(ArmLabel {
            kind: "systematic".to_string(),
            description: "decompose the problem into ordered steps".to_string(),
        });
        for _ in 0..successes {
            stats.record(Outcome::Success, 1.0, FeedbackSource::Execution, Utc::now(), 10, 0.1);
        }
        for _ in 0..failures {
            stats.record(Outcome::Failure, 0.0, FeedbackSource::Execution, Utc::now(), 10, 0.1);
        }
        stats
    }

    #[tokio::test]
    async fn test_never_promotes_below_min_samples() {
        let store = GoldenTemplateStore::new(GoldenConfig::default());
        let stats = labelled("fp", 4, 0);
        assert!(store.evaluate(&stats).await.is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_promotes_at_threshold() {
        let store = GoldenTemplateStore::new(GoldenConfig::default());
        let stats = labelled("fp", 4, 1);
        let changes = store.evaluate(&stats).await;
        assert!(matches!(changes.as_slice(), [GoldenChange::Promoted(_)]));
        let template = store.get(&Fingerprint::from("fp")).await.unwrap();
        assert_eq!(template.success_rate_at_promotion, 0.8);
        assert_eq!(template.path_type, "systematic");
    }

    #[tokio::test]
    async fn test_demotion_keeps_hysteresis() {
        let store = GoldenTemplateStore::new(GoldenConfig::default());
        let mut stats = labelled("fp", 10, 0);
        store.evaluate(&stats).await;
        assert!(store.contains(&Fingerprint::from("fp")).await);

        // Rolling rate 0.6 is below promotion but above demotion: stays golden.
        for _ in 0..4 {
            stats.record(Outcome::Failure, 0.0, FeedbackSource::Execution, Utc::now(), 10, 0.1);
        }
        assert!(store.evaluate(&stats).await.is_empty());

        for _ in 0..2 {
            stats.record(Outcome::Failure, 0.0, FeedbackSource::Execution, Utc::now(), 10, 0.1);
        }
        let changes = store.evaluate(&stats).await;
        assert!(matches!(changes.as_slice(), [GoldenChange::Demoted { .. }]));
        assert!(!store.contains(&Fingerprint::from("fp")).await);
        // Overall rate is still high, but the rolling window blocks re-promotion.
        assert!(stats.success_rate() >= 0.6);
        assert!(store.evaluate(&stats).await.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_worst() {
        let config = GoldenConfig {
            max_templates: 1,
            ..GoldenConfig::default()
        };
        let store = GoldenTemplateStore::new(config);
        store.evaluate(&labelled("a", 8, 2)).await;
        let changes = store.evaluate(&labelled("b", 10, 0)).await;
        assert_eq!(changes.len(), 2);
        assert!(matches!(&changes[0], GoldenChange::Evicted(fp) if fp.as_str() == "a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_find_matches_by_similarity() {
        let store = GoldenTemplateStore::new(GoldenConfig::default());
        store.evaluate(&labelled("fp", 10, 0)).await;

        let hits = store
            .find_matches("how should I decompose this problem", 0.15, 2)
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > hits[0].similarity);

        let misses = store.find_matches("bake bread", 0.15, 2).await;
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn test_export_import_moves_templates() {
        let source = GoldenTemplateStore::new(GoldenConfig::default());
        source.evaluate(&labelled("a", 10, 0)).await;
        source.evaluate(&labelled("b", 8, 2)).await;
        let export = source.export().await;
        assert_eq!(export.summary.total_templates, 2);

        let target = GoldenTemplateStore::new(GoldenConfig::default());
        target.evaluate(&labelled("c", 9, 1)).await;
        assert_eq!(target.import(export.templates.clone(), false).await, 2);
        assert_eq!(target.len().await, 3);

        assert_eq!(target.import(export.templates, true).await, 2);
        assert_eq!(target.all().await, source.all().await);
    }

    #[tokio::test]
    async fn test_import_respects_capacity() {
        let source = GoldenTemplateStore::new(GoldenConfig::default());
        source.evaluate(&labelled("a", 8, 2)).await;
        source.evaluate(&labelled("b", 10, 0)).await;

        let target = GoldenTemplateStore::new(GoldenConfig {
            max_templates: 1,
            ..GoldenConfig::default()
        });
        assert_eq!(target.import(source.all().await, true).await, 1);
        assert!(target.contains(&Fingerprint::from("b")).await);
    }

    #[tokio::test]
    async fn test_summary_tracks_hits() {
        let store = GoldenTemplateStore::new(GoldenConfig::default());
        store.evaluate(&labelled("fp", 10, 0)).await;
        store.record_hit(&Fingerprint::from("fp")).await;
        store.record_hit(&Fingerprint::from("fp")).await;

        let summary = store.summary().await;
        assert_eq!(summary.total_templates, 1);
        assert_eq!(summary.total_hits, 2);
        assert_eq!(summary.most_used, Some(Fingerprint::from("fp")));
        assert_eq!(summary.avg_success_rate, 1.0);
    }
}
