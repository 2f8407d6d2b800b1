use async_trait::async_trait;
use revloop_critic::AggregateVerdict;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::WorkflowState;

/// Score at or above which [`ThresholdReviewer`] approves
pub const DEFAULT_APPROVE_AT: f64 = 5.0;

/// Answer from whoever sits behind the escalation gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalDecision {
    pub approved: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl ExternalDecision {
    pub fn approve(note: impl Into<String>) -> Self {
        Self {
            approved: true,
            note: Some(note.into()).filter(|n: &String| !n.is_empty()),
        }
    }

    pub fn reject(note: impl Into<String>) -> Self {
        Self {
            approved: false,
            note: Some(note.into()).filter(|n: &String| !n.is_empty()),
        }
    }
}

#[derive(Error, Debug)]
pub enum EscalationError {
    #[error("Reviewer did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Reviewer unavailable: {0}")]
    Unavailable(String),
}

/// Gate that settles an `ESCALATED` cycle.
///
/// Implementations may block for a long time; the loop runner bounds the
/// wait and observes cancellation.
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn escalate(
        &self,
        state: &WorkflowState,
        verdict: &AggregateVerdict,
    ) -> Result<ExternalDecision, EscalationError>;
}

/// Non-interactive reviewer: approves when the weighted score reaches a floor
#[derive(Debug, Clone)]
pub struct ThresholdReviewer {
    approve_at: f64,
}

impl ThresholdReviewer {
    pub fn new(approve_at: f64) -> Self {
        Self { approve_at }
    }
}

impl Default for ThresholdReviewer {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVE_AT)
    }
}

#[async_trait]
impl EscalationChannel for ThresholdReviewer {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn escalate(
        &self,
        _state: &WorkflowState,
        verdict: &AggregateVerdict,
    ) -> Result<ExternalDecision, EscalationError> {
        let note = format!(
            "score {:.1} against approval floor {:.1}",
            verdict.weighted_score, self.approve_at
        );
        if verdict.weighted_score >= self.approve_at {
            Ok(ExternalDecision::approve(note))
        } else {
            Ok(ExternalDecision::reject(note))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: f64) -> AggregateVerdict {
        AggregateVerdict {
            weighted_score: score,
            passed: false,
            conflicts: vec![],
            feedback: String::new(),
            suggestions: vec![],
            scores: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_threshold_reviewer() {
        let reviewer = ThresholdReviewer::default();
        let state = WorkflowState::new("task", 3);

        let approved = reviewer.escalate(&state, &verdict(5.0)).await.unwrap();
        assert!(approved.approved);

        let rejected = reviewer.escalate(&state, &verdict(4.9)).await.unwrap();
        assert!(!rejected.approved);
        assert!(rejected.note.unwrap().contains("4.9"));
    }

    #[test]
    fn test_empty_note_is_dropped() {
        assert_eq!(ExternalDecision::approve("").note, None);
        assert_eq!(
            ExternalDecision::reject("too slow").note.as_deref(),
            Some("too slow")
        );
    }
}
