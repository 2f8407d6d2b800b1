use revloop_critic::{AggregateVerdict, EvaluationResult};
use std::collections::HashSet;
use thiserror::Error;

use crate::{IterationRecord, ReviewStatus, WorkflowState};

/// How a list-valued field absorbs an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMerge {
    /// New items go after the existing ones
    Append,
    /// New items replace the whole list; an empty update clears it
    Replace,
}

/// Per-field merge policy for list-valued state fields.
///
/// Scalar fields always replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePolicy {
    pub evaluations: ListMerge,
    pub history: ListMerge,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            evaluations: ListMerge::Replace,
            history: ListMerge::Append,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum StateError {
    #[error("Iteration {iteration} exceeds the budget of {max_iterations}")]
    IterationBudgetExceeded {
        iteration: usize,
        max_iterations: usize,
    },

    #[error("Iteration may not go backwards ({current} -> {requested})")]
    IterationRegressed { current: usize, requested: usize },

    #[error("Evaluator '{0}' reported more than once in one cycle")]
    DuplicateEvaluation(String),

    #[error("Workflow already reached terminal status '{0}'")]
    TerminalState(ReviewStatus),

    #[error("No verdict available while status is '{0}'")]
    MissingVerdict(ReviewStatus),
}

/// Partial update merged into [`WorkflowState`] by [`StateStore::apply`]
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    artifact: Option<String>,
    iteration: Option<usize>,
    evaluations: Option<Vec<EvaluationResult>>,
    verdict: Option<AggregateVerdict>,
    status: Option<ReviewStatus>,
    reviewer_note: Option<Option<String>>,
    history: Option<Vec<IterationRecord>>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifact(mut self, artifact: String) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn iteration(mut self, iteration: usize) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn evaluations(mut self, evaluations: Vec<EvaluationResult>) -> Self {
        self.evaluations = Some(evaluations);
        self
    }

    /// Empty the evaluations list (under the `Replace` policy)
    pub fn clear_evaluations(self) -> Self {
        self.evaluations(Vec::new())
    }

    pub fn verdict(mut self, verdict: AggregateVerdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn status(mut self, status: ReviewStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reviewer_note(mut self, note: Option<String>) -> Self {
        self.reviewer_note = Some(note);
        self
    }

    pub fn record(mut self, record: IterationRecord) -> Self {
        self.history.get_or_insert_with(Vec::new).push(record);
        self
    }
}

/// Owns the state of exactly one workflow run.
///
/// Updates are validated in full before anything is written, so a rejected
/// update leaves the state untouched.
#[derive(Debug)]
pub struct StateStore {
    state: WorkflowState,
    policy: MergePolicy,
}

impl StateStore {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            state,
            policy: MergePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn get(&self) -> &WorkflowState {
        &self.state
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn into_inner(self) -> WorkflowState {
        self.state
    }

    pub fn apply(&mut self, update: StateUpdate) -> Result<(), StateError> {
        self.validate(&update)?;

        let StateUpdate {
            artifact,
            iteration,
            evaluations,
            verdict,
            status,
            reviewer_note,
            history,
        } = update;

        if let Some(artifact) = artifact {
            self.state.artifact = artifact;
        }
        if let Some(iteration) = iteration {
            self.state.iteration = iteration;
        }
        if let Some(evaluations) = evaluations {
            merge_list(&mut self.state.evaluations, evaluations, self.policy.evaluations);
        }
        if let Some(verdict) = verdict {
            self.state.verdict = Some(verdict);
        }
        if let Some(status) = status {
            self.state.status = status;
        }
        if let Some(note) = reviewer_note {
            self.state.reviewer_note = note;
        }
        if let Some(records) = history {
            merge_list(&mut self.state.history, records, self.policy.history);
        }

        Ok(())
    }

    fn validate(&self, update: &StateUpdate) -> Result<(), StateError> {
        if self.state.status.is_terminal() {
            return Err(StateError::TerminalState(self.state.status));
        }

        if let Some(requested) = update.iteration {
            if requested < self.state.iteration {
                return Err(StateError::IterationRegressed {
                    current: self.state.iteration,
                    requested,
                });
            }
            if requested > self.state.max_iterations {
                return Err(StateError::IterationBudgetExceeded {
                    iteration: requested,
                    max_iterations: self.state.max_iterations,
                });
            }
        }

        if let Some(incoming) = &update.evaluations {
            let existing: &[EvaluationResult] = match self.policy.evaluations {
                ListMerge::Append => &self.state.evaluations,
                ListMerge::Replace => &[],
            };
            let mut seen = HashSet::new();
            for result in existing.iter().chain(incoming.iter()) {
                if !seen.insert(result.evaluator_id.as_str()) {
                    return Err(StateError::DuplicateEvaluation(result.evaluator_id.clone()));
                }
            }
        }

        Ok(())
    }
}

fn merge_list<T>(target: &mut Vec<T>, incoming: Vec<T>, policy: ListMerge) {
    match policy {
        ListMerge::Append => target.extend(incoming),
        ListMerge::Replace => *target = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecisionSource;
    use revloop_critic::Assessment;

    fn result(id: &str, score: f64) -> EvaluationResult {
        EvaluationResult::scored(id, Assessment::new(score, score >= 7.0, "ok"))
    }

    fn verdict(score: f64) -> AggregateVerdict {
        AggregateVerdict {
            weighted_score: score,
            passed: score >= 7.0,
            conflicts: vec![],
            feedback: String::new(),
            suggestions: vec![],
            scores: Default::default(),
        }
    }

    #[test]
    fn test_apply_replaces_scalars() {
        let mut store = StateStore::new(WorkflowState::new("task", 3));
        store
            .apply(
                StateUpdate::new()
                    .artifact("v1".into())
                    .iteration(1)
                    .status(ReviewStatus::InReview),
            )
            .unwrap();

        let state = store.get();
        assert_eq!(state.artifact, "v1");
        assert_eq!(state.iteration, 1);
        assert_eq!(state.status, ReviewStatus::InReview);
    }

    #[test]
    fn test_history_appends_and_evaluations_replace() {
        let mut store = StateStore::new(WorkflowState::new("task", 3));
        store
            .apply(StateUpdate::new().evaluations(vec![result("a", 8.0), result("b", 6.0)]))
            .unwrap();
        store
            .apply(StateUpdate::new().evaluations(vec![result("a", 9.0)]))
            .unwrap();
        assert_eq!(store.get().evaluations.len(), 1);

        store.apply(StateUpdate::new().clear_evaluations()).unwrap();
        assert!(store.get().evaluations.is_empty());

        for n in 1..=2 {
            let record = IterationRecord::new(
                store.get(),
                verdict(n as f64),
                ReviewStatus::NeedsRevision,
                DecisionSource::Verdict,
            );
            store.apply(StateUpdate::new().record(record)).unwrap();
        }
        let history = &store.get().history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].verdict.weighted_score, 1.0);
        assert_eq!(history[1].verdict.weighted_score, 2.0);
    }

    #[test]
    fn test_append_policy_for_evaluations_rejects_duplicates() {
        let policy = MergePolicy {
            evaluations: ListMerge::Append,
            history: ListMerge::Append,
        };
        let mut store = StateStore::new(WorkflowState::new("task", 3)).with_policy(policy);
        store
            .apply(StateUpdate::new().evaluations(vec![result("a", 8.0)]))
            .unwrap();
        store
            .apply(StateUpdate::new().evaluations(vec![result("b", 8.0)]))
            .unwrap();
        assert_eq!(store.get().evaluations.len(), 2);

        let err = store
            .apply(StateUpdate::new().evaluations(vec![result("a", 1.0)]))
            .unwrap_err();
        assert_eq!(err, StateError::DuplicateEvaluation("a".into()));
        assert_eq!(store.get().evaluations.len(), 2);
    }

    #[test]
    fn test_rejected_update_leaves_state_untouched() {
        let mut store = StateStore::new(WorkflowState::new("task", 2));
        let before = store.get().clone();

        let err = store
            .apply(StateUpdate::new().artifact("too far".into()).iteration(3))
            .unwrap_err();

        assert!(matches!(err, StateError::IterationBudgetExceeded { .. }));
        assert_eq!(store.get(), &before);
    }

    #[test]
    fn test_iteration_cannot_regress() {
        let mut store = StateStore::new(WorkflowState::new("task", 3));
        store.apply(StateUpdate::new().iteration(2)).unwrap();
        let err = store.apply(StateUpdate::new().iteration(1)).unwrap_err();
        assert_eq!(
            err,
            StateError::IterationRegressed {
                current: 2,
                requested: 1
            }
        );
    }

    #[test]
    fn test_terminal_state_is_frozen() {
        let mut store = StateStore::new(WorkflowState::new("task", 3));
        store
            .apply(StateUpdate::new().status(ReviewStatus::Approved))
            .unwrap();
        let err = store
            .apply(StateUpdate::new().artifact("late".into()))
            .unwrap_err();
        assert_eq!(err, StateError::TerminalState(ReviewStatus::Approved));
    }
}
