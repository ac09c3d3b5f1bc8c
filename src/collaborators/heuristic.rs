//! Offline, deterministic collaborators.
//!
//! These let the engine run without a language model: seeds are templated
//! from the query, paths come from fixed strategy families, and verification
//! is a keyword check. Descriptions do not depend on the query, so the same
//! strategy keeps the same fingerprint across sessions and learning carries
//! over.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use super::{PathProposer, SeedGenerator, ToolCatalog, ToolDescriptor, ToolInvocation, Verifier};
use crate::engine::types::{Context, GenerationMode, PathDraft, Verdict, VerificationReport};
use crate::error::{CollaboratorError, CollaboratorResult};

/// Strategy families offered in normal mode.
const NORMAL_FAMILIES: &[(&str, &str)] = &[
    (
        "systematic",
        "break the problem into ordered steps and resolve each step in sequence",
    ),
    (
        "analytical",
        "identify the key variables and compare options against explicit criteria",
    ),
    (
        "pragmatic",
        "choose the smallest workable action and iterate on observed results",
    ),
    (
        "critical",
        "list the assumptions behind each option and test the weakest one first",
    ),
    (
        "collaborative",
        "gather the perspectives of the people affected and look for shared ground",
    ),
    (
        "strategic",
        "weigh long-term consequences and pick the option that keeps future choices open",
    ),
];

/// Strategy families offered in creative (aha) mode.
const CREATIVE_FAMILIES: &[(&str, &str)] = &[
    (
        "lateral",
        "reframe the problem from an unrelated domain and borrow its solution",
    ),
    (
        "inversion",
        "ask what would guarantee failure and design the opposite",
    ),
    (
        "analogical",
        "find a solved problem with the same structure and map its answer across",
    ),
    (
        "experimental",
        "run a cheap reversible experiment and let the evidence decide",
    ),
    (
        "constraint_relaxation",
        "drop the hardest constraint, solve the easier problem, then reintroduce it",
    ),
];

/// Deterministic seed used when no seed generator answers.
pub fn minimal_seed(query: &str) -> String {
    let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
    format!(
        "Decide how to approach: {}. Clarify the goal, the constraints and the options, then pick a method.",
        query
    )
}

/// Template-based seed generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSeedGenerator;

#[async_trait]
impl SeedGenerator for HeuristicSeedGenerator {
    async fn generate(&self, query: &str, context: &Context) -> CollaboratorResult<String> {
        if query.trim().is_empty() {
            return Err(CollaboratorError::InvalidResponse {
                message: "empty query".to_string(),
            });
        }
        let mut seed = minimal_seed(query);
        if !context.is_empty() {
            let mut keys: Vec<&String> = context.keys().collect();
            keys.sort();
            let keys: Vec<&str> = keys.into_iter().map(String::as_str).collect();
            seed.push_str(&format!(" Consider the context: {}.", keys.join(", ")));
        }
        Ok(seed)
    }
}

/// Picks strategy families, rotating the starting family by seed content.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicProposer;

#[async_trait]
impl PathProposer for HeuristicProposer {
    async fn propose(
        &self,
        seed: &str,
        _context: &Context,
        mode: GenerationMode,
        k: usize,
    ) -> CollaboratorResult<Vec<PathDraft>> {
        let families = match mode {
            GenerationMode::Normal => NORMAL_FAMILIES,
            GenerationMode::Creative => CREATIVE_FAMILIES,
        };
        let offset = seed.bytes().map(usize::from).sum::<usize>() % families.len();
        Ok(families
            .iter()
            .cycle()
            .skip(offset)
            .take(k.min(families.len()))
            .map(|(kind, description)| PathDraft::new(*kind, *description))
            .collect())
    }
}

/// Keyword-based verifier.
///
/// A candidate is infeasible when it mentions a blocked term (built-in or
/// listed under the `forbidden` context key), uncertain when it is too short
/// to judge, and feasible otherwise.
#[derive(Debug, Clone)]
pub struct HeuristicVerifier {
    blocked: Vec<String>,
    min_words: usize,
}

impl HeuristicVerifier {
    /// Create a verifier with explicit blocked terms.
    pub fn new(blocked: &[&str], min_words: usize) -> Self {
        Self {
            blocked: blocked.iter().map(|t| t.to_lowercase()).collect(),
            min_words,
        }
    }
}

impl Default for HeuristicVerifier {
    fn default() -> Self {
        Self::new(&["impossible", "illegal", "unbounded"], 3)
    }
}

#[async_trait]
impl Verifier for HeuristicVerifier {
    async fn check(&self, candidate: &str, context: &Context) -> CollaboratorResult<VerificationReport> {
        let words: HashSet<String> = candidate
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let forbidden = context
            .get("forbidden")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
            .map(str::to_lowercase);

        for term in self.blocked.iter().cloned().chain(forbidden) {
            if words.contains(&term) {
                return Ok(VerificationReport::new(Verdict::Infeasible)
                    .with_evidence(format!("mentions blocked term '{}'", term)));
            }
        }

        if words.len() < self.min_words {
            return Ok(VerificationReport::new(Verdict::Uncertain)
                .with_evidence("too little content to judge"));
        }
        Ok(VerificationReport::new(Verdict::Feasible).with_evidence("no blocking terms found"))
    }
}

/// Fixed in-process tool catalog.
///
/// Invocation echoes the parameters back; tools listed as failing always
/// report `success: false`.
#[derive(Debug, Clone, Default)]
pub struct StaticToolCatalog {
    tools: Vec<ToolDescriptor>,
    failing: HashSet<String>,
}

impl StaticToolCatalog {
    /// Catalog over the given tools.
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            failing: HashSet::new(),
        }
    }

    /// Mark tools whose invocations report failure.
    pub fn with_failing(mut self, ids: &[&str]) -> Self {
        self.failing.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    /// A small general-purpose catalog.
    pub fn builtin() -> Self {
        Self::new(vec![
            ToolDescriptor::new(
                "web_search",
                &["search", "lookup", "web", "news"],
                "search the web for current information",
            ),
            ToolDescriptor::new(
                "calculator",
                &["math", "calculate", "arithmetic", "numbers"],
                "evaluate arithmetic expressions",
            ),
            ToolDescriptor::new(
                "code_runner",
                &["code", "execute", "script", "program"],
                "run a short program and return its output",
            ),
            ToolDescriptor::new(
                "summarizer",
                &["summarize", "text", "document", "condense"],
                "condense a document into key points",
            ),
        ])
    }
}

#[async_trait]
impl ToolCatalog for StaticToolCatalog {
    async fn list(&self) -> CollaboratorResult<Vec<ToolDescriptor>> {
        Ok(self.tools.clone())
    }

    async fn invoke(&self, tool_id: &str, params: &serde_json::Value) -> CollaboratorResult<ToolInvocation> {
        if !self.tools.iter().any(|t| t.id == tool_id) {
            return Err(CollaboratorError::Failed {
                message: format!("unknown tool: {}", tool_id),
            });
        }
        Ok(ToolInvocation {
            result: json!({ "tool": tool_id, "params": params }),
            success: !self.failing.contains(tool_id),
        })
    }
}
