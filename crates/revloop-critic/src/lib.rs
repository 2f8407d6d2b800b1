//! # revloop-critic
//!
//! Independent evaluators for revloop and the aggregation of their scores.
//!
//! ## Key Types
//!
//! - [`Evaluator`] - Scores one artifact version, never sees other evaluators
//! - [`EvaluatorSet`] - Registry keyed by evaluator id, runs a cycle's fan-out
//! - [`EvaluationResult`] - One evaluator's output for one artifact version
//! - [`Aggregator`] / [`AggregateVerdict`] - Weighted mean, pass flag and conflicts
//!
//! Evaluators that fail, time out or return unparseable scores are replaced
//! by a clearly marked fallback result instead of aborting the cycle.

mod aggregator;
mod critic;
pub mod evaluator;
mod parse;
mod prompts;
mod registry;
mod result;
mod sandbox;

pub use aggregator::{AggregateVerdict, Aggregator, Conflict};
pub use critic::CriticEvaluator;
pub use evaluator::{Assessment, EvaluationError, EvaluationInput, Evaluator};
pub use parse::ScoreParseError;
pub use prompts::ReviewPrompts;
pub use registry::{EvaluatorSet, RegistryError, DEFAULT_WEIGHT};
pub use result::{EvaluationResult, ResultKind};
pub use sandbox::SandboxEvaluator;

/// Upper bound of the score scale used by every evaluator
pub const MAX_SCORE: f64 = 10.0;
