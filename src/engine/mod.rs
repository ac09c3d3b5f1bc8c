//! The decision engine.
//!
//! - [`orchestrator`]: the five-stage pipeline and feedback entry point
//! - [`converger`] and [`bandit`]: statistics-driven path selection
//! - [`golden`]: promoted high-performing paths reused as seeds
//! - [`ledger`]: applied execution feedback, kept for exactly-once updates
//! - [`aha`]: deadlock detection and the creative bypass
//! - [`tool_selector`]: cold-start aware tool choice
//! - [`state`]: the long-lived learning state and its persistence

pub mod aha;
pub mod bandit;
pub mod converger;
pub mod golden;
pub mod ledger;
pub mod orchestrator;
pub mod path_pool;
pub mod session;
pub mod state;
pub mod statistics;
pub mod tool_selector;
pub mod types;

pub use aha::{AhaReason, AhaState, AhaStats, AhaTrigger};
pub use bandit::{BanditAlgorithm, BanditPolicy, ConvergenceReport, Selection};
pub use converger::{FeedbackReceipt, MabConverger};
pub use golden::{
    GoldenChange, GoldenExport, GoldenSummary, GoldenTemplate, GoldenTemplateStore, TemplateMatch,
};
pub use ledger::{AppliedFeedback, FeedbackLedger};
pub use orchestrator::{DecisionEngine, FeedbackTarget};
pub use path_pool::PathPool;
pub use session::{DecisionOutcome, DecisionSession, Stage, TraceEntry, TraceEvent};
pub use state::{HydrationReport, LearningState};
pub use statistics::{ArmStatistics, StatisticsStore};
pub use tool_selector::{
    assess_cold_start, ColdStartAssessment, HybridToolSelector, ToolChoice, ToolMode, ToolOutcome,
};
pub use types::{
    Context, FeedbackEvent, FeedbackSource, Fingerprint, GenerationMode, Outcome, Path, PathDraft,
    PathOrigin, Verdict, VerificationReport,
};
