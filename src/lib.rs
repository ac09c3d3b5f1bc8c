//! # Metacognitive Decision Engine
//!
//! Chooses among candidate reasoning paths for a query and learns from how
//! those choices turn out.
//!
//! ## Pipeline
//!
//! ```text
//! query ─► S1 seed ─► S2 verify seed ─► S3 expand paths ─► S4 verify paths ─► S5 converge
//!                                            ▲                    │
//!                                   golden templates       aha bypass (creative)
//!                                            │                    │
//!                                     learning state ◄── instant learning + feedback
//! ```
//!
//! Seeds, verdicts and path proposals come from pluggable
//! [`collaborators`]. Path statistics, tool statistics and golden templates
//! live in a [`engine::LearningState`] that outlives sessions and can be
//! persisted through [`storage`].
//!
//! ## Example
//!
//! ```ignore
//! use metacog_decision::{Config, DecisionEngine, LearningState};
//! use metacog_decision::collaborators::Collaborators;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = LearningState::new(&config);
//!     let engine = DecisionEngine::new(config, Collaborators::heuristic(), state)?;
//!     let session = engine.decide("pick a cache strategy", Default::default()).await;
//!     println!("{}", session.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// External collaborator traits, retry policy and offline heuristics.
pub mod collaborators;
/// Configuration management.
pub mod config;
/// Decision pipeline, learners and learning state.
pub mod engine;
/// Error types and result aliases for the application.
pub mod error;
/// Persistence for learning state.
pub mod storage;

pub use config::Config;
pub use engine::{DecisionEngine, DecisionSession, FeedbackTarget, LearningState};
pub use error::{AppError, AppResult};
