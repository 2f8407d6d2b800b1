use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::WorkflowState;

/// The final outcome of a review loop
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoopOutcome {
    /// Verdict (or reviewer) approved the artifact, or the budget ran out
    /// under the approve force-stop policy
    Approved {
        iterations: usize,
        forced: bool,
        weighted_score: Option<f64>,
        artifact: String,
        #[serde(skip)]
        state: WorkflowState,
        total_duration_secs: f64,
    },
    /// Rejected by the reviewer or the reject force-stop policy
    Rejected {
        iterations: usize,
        weighted_score: Option<f64>,
        #[serde(skip)]
        state: WorkflowState,
        total_duration_secs: f64,
    },
    /// Cancellation requested (e.g., Ctrl+C)
    Cancelled {
        iterations: usize,
        #[serde(skip)]
        state: WorkflowState,
        total_duration_secs: f64,
    },
    /// Unrecoverable error
    Failed {
        iterations: usize,
        error: String,
        #[serde(skip)]
        state: WorkflowState,
        total_duration_secs: f64,
    },
}

impl LoopOutcome {
    pub fn approved(state: WorkflowState, forced: bool, duration: Duration) -> Self {
        Self::Approved {
            iterations: state.iteration,
            forced,
            weighted_score: state.verdict.as_ref().map(|v| v.weighted_score),
            artifact: state.artifact.clone(),
            state,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn rejected(state: WorkflowState, duration: Duration) -> Self {
        Self::Rejected {
            iterations: state.iteration,
            weighted_score: state.verdict.as_ref().map(|v| v.weighted_score),
            state,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn cancelled(state: WorkflowState, duration: Duration) -> Self {
        Self::Cancelled {
            iterations: state.iteration,
            state,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn failed(state: WorkflowState, error: String, duration: Duration) -> Self {
        Self::Failed {
            iterations: state.iteration,
            error,
            state,
            total_duration_secs: duration.as_secs_f64(),
        }
    }

    pub fn iterations(&self) -> usize {
        match self {
            Self::Approved { iterations, .. } => *iterations,
            Self::Rejected { iterations, .. } => *iterations,
            Self::Cancelled { iterations, .. } => *iterations,
            Self::Failed { iterations, .. } => *iterations,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Approved { .. })
    }

    pub fn weighted_score(&self) -> Option<f64> {
        self.state().verdict.as_ref().map(|v| v.weighted_score)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Approved { forced: true, .. } => "approved (forced)",
            Self::Approved { .. } => "approved",
            Self::Rejected { .. } => "rejected",
            Self::Cancelled { .. } => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn duration_secs(&self) -> f64 {
        match self {
            Self::Approved { total_duration_secs, .. }
            | Self::Rejected { total_duration_secs, .. }
            | Self::Cancelled { total_duration_secs, .. }
            | Self::Failed { total_duration_secs, .. } => *total_duration_secs,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        match self {
            Self::Approved { state, .. }
            | Self::Rejected { state, .. }
            | Self::Cancelled { state, .. }
            | Self::Failed { state, .. } => state,
        }
    }

    pub fn into_state(self) -> WorkflowState {
        match self {
            Self::Approved { state, .. }
            | Self::Rejected { state, .. }
            | Self::Cancelled { state, .. }
            | Self::Failed { state, .. } => state,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Approved { .. } => 0,
            Self::Rejected { .. } => 1,
            Self::Cancelled { .. } => 130,
            Self::Failed { .. } => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_and_serialization() {
        let mut state = WorkflowState::new("task", 3);
        state.iteration = 2;
        state.artifact = "done".into();

        let approved = LoopOutcome::approved(state.clone(), true, Duration::from_secs(4));
        assert_eq!(approved.exit_code(), 0);
        assert_eq!(approved.iterations(), 2);
        assert_eq!(approved.label(), "approved (forced)");

        let json = serde_json::to_value(&approved).unwrap();
        assert_eq!(json["status"], "approved");
        assert_eq!(json["forced"], true);
        assert_eq!(json["artifact"], "done");
        assert!(json.get("state").is_none());

        assert_eq!(LoopOutcome::rejected(state.clone(), Duration::ZERO).exit_code(), 1);
        assert_eq!(LoopOutcome::cancelled(state.clone(), Duration::ZERO).exit_code(), 130);
        let failed = LoopOutcome::failed(state, "boom".into(), Duration::ZERO);
        assert_eq!(failed.exit_code(), 2);
        assert!(!failed.is_success());
    }
}
