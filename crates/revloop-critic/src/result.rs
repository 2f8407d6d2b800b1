use serde::{Deserialize, Serialize};

use crate::Assessment;

/// How an [`EvaluationResult`] came to be
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// The evaluator produced a structured assessment
    #[default]
    Scored,
    /// Substitute for an evaluator that failed, timed out or panicked
    Fallback,
    /// The evaluator declined to score this cycle
    Abstained,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Scored => "scored",
            ResultKind::Fallback => "fallback",
            ResultKind::Abstained => "abstained",
        }
    }
}

/// Output of one evaluator for one artifact version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub evaluator_id: String,
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub kind: ResultKind,
}

impl EvaluationResult {
    pub fn scored(evaluator_id: &str, assessment: Assessment) -> Self {
        Self {
            evaluator_id: evaluator_id.to_string(),
            score: assessment.score,
            passed: assessment.passed,
            feedback: assessment.feedback,
            suggestions: assessment.suggestions,
            kind: ResultKind::Scored,
        }
    }

    /// Sentinel result standing in for a failed evaluator. Never passes.
    pub fn fallback(evaluator_id: &str, score: f64, reason: &str) -> Self {
        Self {
            evaluator_id: evaluator_id.to_string(),
            score,
            passed: false,
            feedback: format!("[fallback] evaluator produced no usable result: {}", reason),
            suggestions: Vec::new(),
            kind: ResultKind::Fallback,
        }
    }

    pub fn abstained(evaluator_id: &str) -> Self {
        Self {
            evaluator_id: evaluator_id.to_string(),
            score: 0.0,
            passed: false,
            feedback: String::new(),
            suggestions: Vec::new(),
            kind: ResultKind::Abstained,
        }
    }

    pub fn is_abstained(&self) -> bool {
        self.kind == ResultKind::Abstained
    }

    /// Short description for logs and history
    pub fn short_description(&self) -> String {
        match self.kind {
            ResultKind::Scored => format!(
                "{}: {:.1} ({})",
                self.evaluator_id,
                self.score,
                if self.passed { "pass" } else { "fail" }
            ),
            ResultKind::Fallback => format!("{}: {:.1} (fallback)", self.evaluator_id, self.score),
            ResultKind::Abstained => format!("{}: abstained", self.evaluator_id),
        }
    }
}
