use chrono::{DateTime, Utc};
use revloop_critic::{AggregateVerdict, EvaluationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters of the artifact kept in each history record
const EXCERPT_LEN: usize = 200;

/// Decision-engine state of a workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Pending,
    InReview,
    Approved,
    NeedsRevision,
    Escalated,
    Rejected,
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::InReview => "in_review",
            ReviewStatus::Approved => "approved",
            ReviewStatus::NeedsRevision => "needs_revision",
            ReviewStatus::Escalated => "escalated",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What settled a cycle's status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The aggregate verdict alone
    Verdict,
    /// An external reviewer behind the escalation gate
    Reviewer,
    /// The force-stop policy at the iteration ceiling
    ForceStop,
}

/// Summary of one completed cycle. Appended once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub artifact_excerpt: String,
    pub verdict: AggregateVerdict,
    pub status: ReviewStatus,
    pub decided_by: DecisionSource,
    #[serde(default)]
    pub reviewer_note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(
        state: &WorkflowState,
        verdict: AggregateVerdict,
        status: ReviewStatus,
        decided_by: DecisionSource,
    ) -> Self {
        Self {
            iteration: state.iteration,
            artifact_excerpt: state.artifact.chars().take(EXCERPT_LEN).collect(),
            verdict,
            status,
            decided_by,
            reviewer_note: state.reviewer_note.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// The single mutable record threaded through a workflow run.
///
/// Mutated only through [`crate::StateStore::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: Uuid,
    /// Goal of the workflow; never changes after creation
    pub task: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Current candidate output
    pub artifact: String,
    /// Completed produce/evaluate cycles
    pub iteration: usize,
    pub max_iterations: usize,
    /// Results of the current cycle only
    #[serde(default)]
    pub evaluations: Vec<EvaluationResult>,
    pub verdict: Option<AggregateVerdict>,
    pub status: ReviewStatus,
    /// Note from the last external review, fed into the next revision
    #[serde(default)]
    pub reviewer_note: Option<String>,
    #[serde(default)]
    pub history: Vec<IterationRecord>,
}

impl WorkflowState {
    pub fn new(task: impl Into<String>, max_iterations: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            task: task.into(),
            max_iterations,
            ..Default::default()
        }
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn has_budget(&self) -> bool {
        self.iteration < self.max_iterations
    }

    /// Feedback to hand the producer: the last verdict's feedback plus any
    /// reviewer note.
    pub fn revision_feedback(&self) -> Option<AggregateVerdict> {
        let mut verdict = self.verdict.clone()?;
        if let Some(note) = self.reviewer_note.as_deref().filter(|n| !n.is_empty()) {
            if !verdict.feedback.is_empty() {
                verdict.feedback.push('\n');
            }
            verdict.feedback.push_str(&format!("[reviewer] {}", note));
        }
        Some(verdict)
    }
}
