use revloop_critic::AggregateVerdict;
use serde::{Deserialize, Serialize};

use crate::{DecisionSource, ExternalDecision, ReviewStatus, WorkflowState};

/// What to do when the iteration budget runs out without a passing verdict.
///
/// There is deliberately no `Default`: callers must choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceStopPolicy {
    /// End the run as `Rejected`
    Reject,
    /// End the run as `Approved`, flagged as forced
    Approve,
}

impl std::fmt::Display for ForceStopPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForceStopPolicy::Reject => write!(f, "reject"),
            ForceStopPolicy::Approve => write!(f, "approve"),
        }
    }
}

impl std::str::FromStr for ForceStopPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(ForceStopPolicy::Reject),
            "approve" | "force-approve" => Ok(ForceStopPolicy::Approve),
            _ => Err(format!("Unknown force-stop policy: {}", s)),
        }
    }
}

/// When a cycle is routed to the escalation gate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Escalate whenever evaluators disagree beyond the conflict spread
    pub on_conflict: bool,
    /// Escalate when the weighted score falls below this
    pub human_review_threshold: Option<f64>,
    /// Send every cycle through the gate
    pub always: bool,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            on_conflict: true,
            human_review_threshold: None,
            always: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionPolicy {
    pub force_stop: ForceStopPolicy,
    pub escalation: EscalationPolicy,
}

impl DecisionPolicy {
    pub fn new(force_stop: ForceStopPolicy) -> Self {
        Self {
            force_stop,
            escalation: EscalationPolicy::default(),
        }
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EscalationReason {
    Conflict(Vec<String>),
    LowScore { score: f64, threshold: f64 },
    Required,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::Conflict(conflicts) => {
                write!(f, "evaluators disagree: {}", conflicts.join("; "))
            }
            EscalationReason::LowScore { score, threshold } => {
                write!(f, "score {:.1} below review threshold {:.1}", score, threshold)
            }
            EscalationReason::Required => write!(f, "every cycle requires review"),
        }
    }
}

/// Outcome of the decision engine for one reviewed cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve,
    Revise,
    Escalate(EscalationReason),
    ForceStop(ForceStopPolicy),
}

impl Decision {
    pub fn next_status(&self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Revise => ReviewStatus::NeedsRevision,
            Decision::Escalate(_) => ReviewStatus::Escalated,
            Decision::ForceStop(ForceStopPolicy::Reject) => ReviewStatus::Rejected,
            Decision::ForceStop(ForceStopPolicy::Approve) => ReviewStatus::Approved,
        }
    }

    pub fn source(&self) -> DecisionSource {
        match self {
            Decision::ForceStop(_) => DecisionSource::ForceStop,
            _ => DecisionSource::Verdict,
        }
    }
}

/// Finite-state controller over [`ReviewStatus`]
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Decide an `IN_REVIEW` cycle.
    ///
    /// Escalation is considered first and only when a gate is available;
    /// then a passing verdict approves; then remaining budget revises;
    /// otherwise the force-stop policy applies.
    pub fn decide(
        &self,
        state: &WorkflowState,
        verdict: &AggregateVerdict,
        gate_available: bool,
    ) -> Decision {
        if gate_available {
            if let Some(reason) = self.escalation_reason(verdict) {
                return Decision::Escalate(reason);
            }
        }

        if verdict.passed {
            Decision::Approve
        } else if state.has_budget() {
            Decision::Revise
        } else {
            Decision::ForceStop(self.policy.force_stop)
        }
    }

    /// Status after the external reviewer answered an escalation.
    ///
    /// A rejection at the budget ceiling is final regardless of the
    /// force-stop policy.
    pub fn resolve_escalation(
        &self,
        state: &WorkflowState,
        decision: &ExternalDecision,
    ) -> ReviewStatus {
        if decision.approved {
            ReviewStatus::Approved
        } else if state.has_budget() {
            ReviewStatus::NeedsRevision
        } else {
            ReviewStatus::Rejected
        }
    }

    fn escalation_reason(&self, verdict: &AggregateVerdict) -> Option<EscalationReason> {
        let policy = &self.policy.escalation;

        if policy.on_conflict && verdict.has_conflicts() {
            return Some(EscalationReason::Conflict(
                verdict.conflicts.iter().map(|c| c.describe()).collect(),
            ));
        }
        if let Some(threshold) = policy.human_review_threshold {
            if verdict.weighted_score < threshold {
                return Some(EscalationReason::LowScore {
                    score: verdict.weighted_score,
                    threshold,
                });
            }
        }
        if policy.always {
            return Some(EscalationReason::Required);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revloop_critic::Conflict;

    fn state(iteration: usize, max_iterations: usize) -> WorkflowState {
        let mut state = WorkflowState::new("task", max_iterations);
        state.iteration = iteration;
        state.status = ReviewStatus::InReview;
        state
    }

    fn verdict(score: f64, passed: bool, conflict: bool) -> AggregateVerdict {
        AggregateVerdict {
            weighted_score: score,
            passed,
            conflicts: if conflict {
                vec![Conflict {
                    spread: 7.0,
                    min_score: 2.0,
                    max_score: 9.0,
                    low: vec!["b".into()],
                    high: vec!["a".into()],
                }]
            } else {
                vec![]
            },
            feedback: String::new(),
            suggestions: vec![],
            scores: Default::default(),
        }
    }

    fn engine(force_stop: ForceStopPolicy) -> DecisionEngine {
        DecisionEngine::new(DecisionPolicy::new(force_stop))
    }

    #[test]
    fn test_passing_verdict_approves() {
        let decision = engine(ForceStopPolicy::Reject).decide(
            &state(1, 3),
            &verdict(8.0, true, false),
            true,
        );
        assert_eq!(decision, Decision::Approve);
        assert_eq!(decision.next_status(), ReviewStatus::Approved);
    }

    #[test]
    fn test_failing_verdict_with_budget_revises() {
        let decision = engine(ForceStopPolicy::Reject).decide(
            &state(1, 3),
            &verdict(5.0, false, false),
            true,
        );
        assert_eq!(decision, Decision::Revise);
        assert_eq!(decision.next_status(), ReviewStatus::NeedsRevision);
    }

    #[test]
    fn test_force_stop_policy_at_ceiling() {
        let reject = engine(ForceStopPolicy::Reject).decide(
            &state(3, 3),
            &verdict(5.0, false, false),
            false,
        );
        assert_eq!(reject.next_status(), ReviewStatus::Rejected);
        assert_eq!(reject.source(), DecisionSource::ForceStop);

        let approve = engine(ForceStopPolicy::Approve).decide(
            &state(3, 3),
            &verdict(5.0, false, false),
            false,
        );
        assert_eq!(approve.next_status(), ReviewStatus::Approved);
    }

    #[test]
    fn test_conflict_escalates_even_when_passing() {
        let decision = engine(ForceStopPolicy::Reject).decide(
            &state(1, 3),
            &verdict(7.5, true, true),
            true,
        );
        assert!(matches!(decision, Decision::Escalate(EscalationReason::Conflict(_))));
    }

    #[test]
    fn test_no_gate_means_no_escalation() {
        let decision = engine(ForceStopPolicy::Reject).decide(
            &state(1, 3),
            &verdict(7.5, true, true),
            false,
        );
        assert_eq!(decision, Decision::Approve);
    }

    #[test]
    fn test_low_score_and_required_escalation() {
        let policy = DecisionPolicy::new(ForceStopPolicy::Reject).with_escalation(
            EscalationPolicy {
                on_conflict: false,
                human_review_threshold: Some(4.0),
                always: false,
            },
        );
        let engine = DecisionEngine::new(policy);
        let low = engine.decide(&state(1, 3), &verdict(3.0, false, true), true);
        assert!(matches!(low, Decision::Escalate(EscalationReason::LowScore { .. })));
        let above = engine.decide(&state(1, 3), &verdict(4.0, false, true), true);
        assert_eq!(above, Decision::Revise);

        let always = DecisionEngine::new(DecisionPolicy::new(ForceStopPolicy::Reject).with_escalation(
            EscalationPolicy {
                on_conflict: false,
                human_review_threshold: None,
                always: true,
            },
        ));
        let decision = always.decide(&state(1, 3), &verdict(9.0, true, false), true);
        assert_eq!(decision, Decision::Escalate(EscalationReason::Required));
    }

    #[test]
    fn test_resolve_escalation() {
        let engine = engine(ForceStopPolicy::Approve);
        let approve = ExternalDecision::approve("fine");
        let reject = ExternalDecision::reject("no");

        assert_eq!(
            engine.resolve_escalation(&state(1, 3), &approve),
            ReviewStatus::Approved
        );
        assert_eq!(
            engine.resolve_escalation(&state(1, 3), &reject),
            ReviewStatus::NeedsRevision
        );
        assert_eq!(
            engine.resolve_escalation(&state(3, 3), &reject),
            ReviewStatus::Rejected
        );
    }

    #[test]
    fn test_force_stop_policy_from_str() {
        assert_eq!("Reject".parse::<ForceStopPolicy>().unwrap(), ForceStopPolicy::Reject);
        assert_eq!(
            "force-approve".parse::<ForceStopPolicy>().unwrap(),
            ForceStopPolicy::Approve
        );
        assert!("maybe".parse::<ForceStopPolicy>().is_err());
    }
}
