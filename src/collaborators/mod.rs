//! External collaborator interfaces.
//!
//! The engine never generates or judges text itself. Seeds, verdicts, path
//! proposals and tool calls come from implementations of these traits, which
//! may be backed by a language model, a rules engine, or the offline
//! heuristics in [`heuristic`].
//!
//! Every call the engine makes through these traits is wrapped in a timeout
//! and a bounded retry policy ([`retry::call_with_retry`]).

pub mod heuristic;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::{Context, GenerationMode, PathDraft, VerificationReport};
use crate::error::CollaboratorResult;

pub use heuristic::{HeuristicProposer, HeuristicSeedGenerator, HeuristicVerifier, StaticToolCatalog};
pub use retry::{call_with_retry, RetryPolicy};

/// Produces the initial thinking seed for a query.
#[async_trait]
pub trait SeedGenerator: Send + Sync {
    /// Generate seed text for `query`.
    async fn generate(&self, query: &str, context: &Context) -> CollaboratorResult<String>;
}

/// Judges whether a seed or path is feasible.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Check a candidate; may take arbitrarily long.
    async fn check(&self, candidate: &str, context: &Context) -> CollaboratorResult<VerificationReport>;
}

/// Proposes candidate paths from a seed.
#[async_trait]
pub trait PathProposer: Send + Sync {
    /// Return up to `k` drafts. An empty list is a valid answer.
    async fn propose(
        &self,
        seed: &str,
        context: &Context,
        mode: GenerationMode,
        k: usize,
    ) -> CollaboratorResult<Vec<PathDraft>>;
}

/// A tool with declared capability tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Catalog id, also the tool statistics key.
    pub id: String,
    /// Tags matched against task words.
    pub capabilities: Vec<String>,
    /// Free text, matched by word similarity.
    #[serde(default)]
    pub description: String,
}

impl ToolDescriptor {
    /// Create a descriptor.
    pub fn new(id: impl Into<String>, capabilities: &[&str], description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            description: description.into(),
        }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub result: serde_json::Value,
    pub success: bool,
}

/// Catalog of invocable tools.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// All known tools.
    async fn list(&self) -> CollaboratorResult<Vec<ToolDescriptor>>;

    /// Invoke one tool.
    async fn invoke(&self, tool_id: &str, params: &serde_json::Value) -> CollaboratorResult<ToolInvocation>;
}

/// The collaborators a decision engine needs.
#[derive(Clone)]
pub struct Collaborators {
    pub seed: Arc<dyn SeedGenerator>,
    pub verifier: Arc<dyn Verifier>,
    pub proposer: Arc<dyn PathProposer>,
}

impl Collaborators {
    /// Bundle collaborator handles.
    pub fn new(
        seed: Arc<dyn SeedGenerator>,
        verifier: Arc<dyn Verifier>,
        proposer: Arc<dyn PathProposer>,
    ) -> Self {
        Self {
            seed,
            verifier,
            proposer,
        }
    }

    /// Offline heuristic collaborators.
    pub fn heuristic() -> Self {
        Self::new(
            Arc::new(HeuristicSeedGenerator),
            Arc::new(HeuristicVerifier::default()),
            Arc::new(HeuristicProposer),
        )
    }
}
