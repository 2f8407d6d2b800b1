use async_trait::async_trait;
use revloop_service::ServiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ScoreParseError;

/// Read-only snapshot handed to every evaluator in a cycle.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub task: &'a str,
    pub requirements: &'a [String],
    pub artifact: &'a str,
    /// 1-based number of the cycle being evaluated
    pub iteration: usize,
}

/// An evaluator's judgement of one artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl Assessment {
    pub fn new(score: f64, passed: bool, feedback: impl Into<String>) -> Self {
        Self {
            score,
            passed,
            feedback: feedback.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Failed to parse evaluation: {0}")]
    Parse(#[from] ScoreParseError),

    #[error("Evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Evaluation failed: {0}")]
    Failed(String),
}

/// A single, independent scoring component.
///
/// Implementations only see the artifact and the task; they never observe
/// another evaluator's result.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Human-readable name of the evaluator kind
    fn name(&self) -> &str;

    /// Score the artifact. `Ok(None)` means the evaluator abstains this
    /// cycle and is left out of the weighted mean.
    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Option<Assessment>, EvaluationError>;
}
