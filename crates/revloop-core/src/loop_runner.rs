use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use revloop_critic::{Aggregator, EvaluationInput, EvaluatorSet};
use revloop_logging::{IterationEntry, LogEvent, Logger, SessionWriter};

use crate::{
    Decision, DecisionEngine, DecisionPolicy, DecisionSource, EscalationChannel, ExternalDecision,
    FileCheckpoint, IterationRecord, LoopError, LoopOutcome, Producer, ProducerError,
    ReviewStatus, StateError, StateStore, StateUpdate, WorkflowState,
};

/// Upper bound for the producer retry backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Knobs for the loop driver's suspension points
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Extra attempts after a transient producer failure
    pub producer_retries: u32,
    pub producer_timeout: Option<Duration>,
    /// First retry delay; doubles on every further attempt
    pub retry_backoff: Duration,
    /// Bound on the escalation gate. Expiry counts as a rejection.
    pub escalation_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            producer_retries: 2,
            producer_timeout: None,
            retry_backoff: Duration::from_secs(1),
            escalation_timeout: None,
        }
    }
}

/// Result of one state-machine step
enum Step {
    Advanced,
    Cancelled,
}

/// Orchestrates the produce/evaluate/aggregate/decide loop
pub struct LoopRunner<'a> {
    producer: &'a dyn Producer,
    evaluators: &'a EvaluatorSet,
    escalation: Option<&'a dyn EscalationChannel>,
    aggregator: Aggregator,
    engine: DecisionEngine,
    config: RunnerConfig,
    logger: Arc<Logger>,
    session: Option<Arc<SessionWriter>>,
    checkpoint: Option<FileCheckpoint>,
    cancel: CancellationToken,
}

impl<'a> LoopRunner<'a> {
    pub fn new(
        producer: &'a dyn Producer,
        evaluators: &'a EvaluatorSet,
        aggregator: Aggregator,
        policy: DecisionPolicy,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            producer,
            evaluators,
            escalation: None,
            aggregator,
            engine: DecisionEngine::new(policy),
            config: RunnerConfig::default(),
            logger,
            session: None,
            checkpoint: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Route escalated cycles to `channel`. Without one, escalation is off.
    pub fn with_escalation(mut self, channel: &'a dyn EscalationChannel) -> Self {
        self.escalation = Some(channel);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_session(mut self, session: Arc<SessionWriter>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: FileCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Token that abandons the run at the next suspension point when cancelled
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive `state` to a terminal outcome.
    ///
    /// Accepts a fresh state or one restored from a checkpoint. Errors that
    /// occur mid-run are reported as [`LoopOutcome::Failed`]; only an unusable
    /// setup is returned as `Err`.
    pub async fn run(&self, state: WorkflowState) -> Result<LoopOutcome, LoopError> {
        if self.evaluators.is_empty() {
            return Err(LoopError::ConfigError("no evaluators registered".into()));
        }
        if state.max_iterations == 0 {
            return Err(LoopError::ConfigError(
                "max_iterations must be at least 1".into(),
            ));
        }
        if state.iteration > state.max_iterations {
            return Err(LoopError::ConfigError(format!(
                "state is at iteration {} but the budget is {}",
                state.iteration, state.max_iterations
            )));
        }

        let start = Instant::now();
        let weights = self.evaluators.weights();
        let evaluator_ids: Vec<String> =
            self.evaluators.ids().into_iter().map(String::from).collect();

        self.logger.log(&LogEvent::LoopStarted {
            run_id: state.run_id.to_string(),
            task: state.task.clone(),
            evaluators: evaluator_ids.clone(),
            max_iterations: state.max_iterations,
        });
        if let Some(session) = &self.session {
            session.write_start(
                &state.run_id.to_string(),
                &state.task,
                &state.requirements,
                &evaluator_ids,
                state.max_iterations,
            );
        }
        if state.iteration > 0 {
            info!(
                iteration = state.iteration,
                status = %state.status,
                "Resuming workflow"
            );
        }

        let mut store = StateStore::new(state);

        // Each cycle takes at most three steps: produce, review, escalate.
        let step_limit = 3 * store.get().max_iterations + 3;
        let mut steps = 0;

        while !store.get().status.is_terminal() {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(store, start));
            }

            steps += 1;
            if steps > step_limit {
                let error = format!("no terminal status after {} steps", step_limit);
                return Ok(self.failed(store, error, start));
            }

            let step = match store.get().status {
                ReviewStatus::Pending | ReviewStatus::NeedsRevision => {
                    self.produce_step(&mut store).await
                }
                ReviewStatus::InReview => self.review_step(&mut store, &weights).await,
                ReviewStatus::Escalated => self.escalation_step(&mut store).await,
                ReviewStatus::Approved | ReviewStatus::Rejected => break,
            };

            match step {
                Ok(Step::Advanced) => self.save_checkpoint(store.get()),
                Ok(Step::Cancelled) => return Ok(self.cancelled(store, start)),
                Err(e) => {
                    warn!(error = %e, "Error during iteration");
                    self.logger.log(&LogEvent::ErrorEncountered {
                        iteration: store.get().iteration,
                        error: e.to_string(),
                    });
                    return Ok(self.failed(store, e.to_string(), start));
                }
            }
        }

        Ok(self.finished(store, start))
    }

    /// PENDING / NEEDS_REVISION: produce the next artifact and enter review
    async fn produce_step(&self, store: &mut StateStore) -> Result<Step, LoopError> {
        let state = store.get();
        let from = state.status;

        if !state.has_budget() {
            // Only reachable from a checkpoint written at the ceiling.
            return self.force_stop_step(store);
        }

        let iteration = state.iteration + 1;
        self.logger.log(&LogEvent::ProducerStarted {
            iteration,
            revision: state.verdict.is_some(),
        });

        let started = Instant::now();
        let artifact = match self.produce_with_retry(state, iteration).await? {
            Some(artifact) => artifact,
            None => return Ok(Step::Cancelled),
        };
        if artifact.trim().is_empty() {
            return Err(LoopError::EmptyArtifact { iteration });
        }

        self.logger.log(&LogEvent::ProducerCompleted {
            iteration,
            artifact_len: artifact.len(),
            duration_secs: started.elapsed().as_secs_f64(),
        });

        store.apply(
            StateUpdate::new()
                .artifact(artifact)
                .iteration(iteration)
                .clear_evaluations()
                .reviewer_note(None)
                .status(ReviewStatus::InReview),
        )?;
        self.log_transition(iteration, from, ReviewStatus::InReview);

        Ok(Step::Advanced)
    }

    /// Call the producer, retrying transient failures with exponential
    /// backoff. `None` means the run was cancelled while waiting.
    async fn produce_with_retry(
        &self,
        state: &WorkflowState,
        iteration: usize,
    ) -> Result<Option<String>, LoopError> {
        let mut backoff = self.config.retry_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.produce_once(state) => result,
            };

            match result {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(e) if e.is_transient() && attempt <= self.config.producer_retries => {
                    warn!(iteration, attempt, error = %e, "Producer failed, retrying");
                    self.logger.log(&LogEvent::ProducerRetry {
                        iteration,
                        attempt,
                        error: e.to_string(),
                    });

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = backoff.saturating_mul(2).min(MAX_RETRY_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn produce_once(&self, state: &WorkflowState) -> Result<String, ProducerError> {
        match self.config.producer_timeout {
            Some(limit) => tokio::time::timeout(limit, self.producer.produce(state))
                .await
                .map_err(|_| ProducerError::Timeout(limit))?,
            None => self.producer.produce(state).await,
        }
    }

    /// IN_REVIEW: fan out to every evaluator, aggregate, decide
    async fn review_step(
        &self,
        store: &mut StateStore,
        weights: &HashMap<String, f64>,
    ) -> Result<Step, LoopError> {
        let iteration = store.get().iteration;

        let results = {
            let state = store.get();
            let input = EvaluationInput {
                task: &state.task,
                requirements: &state.requirements,
                artifact: &state.artifact,
                iteration,
            };
            // Results of a cancelled fan-out are dropped, never merged.
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(Step::Cancelled),
                results = self.evaluators.evaluate_all(input) => results,
            }
        };

        for result in &results {
            self.logger.log(&LogEvent::EvaluatorCompleted {
                iteration,
                evaluator: result.evaluator_id.clone(),
                score: result.score,
                passed: result.passed,
                kind: result.kind.as_str().to_string(),
            });
        }

        store.apply(StateUpdate::new().evaluations(results))?;

        let expected = self.evaluators.len();
        let actual = store.get().evaluations.len();
        if actual != expected {
            return Err(LoopError::PartialAggregation { expected, actual });
        }

        let verdict = self.aggregator.aggregate(&store.get().evaluations, weights);
        debug!(iteration, verdict = %verdict.short_description(), "Aggregated");
        self.logger.log(&LogEvent::VerdictReached {
            iteration,
            weighted_score: verdict.weighted_score,
            passed: verdict.passed,
            conflicts: verdict.conflicts.iter().map(|c| c.describe()).collect(),
        });

        let state = store.get();
        let decision = self
            .engine
            .decide(state, &verdict, self.escalation.is_some());
        let to = decision.next_status();

        let mut update = StateUpdate::new()
            .verdict(verdict.clone())
            .clear_evaluations()
            .status(to);

        match &decision {
            Decision::Escalate(reason) => {
                info!(iteration, reason = %reason, "Escalating for external review");
                self.logger.log(&LogEvent::EscalationStarted {
                    iteration,
                    reason: reason.to_string(),
                });
            }
            other => {
                if let Decision::ForceStop(policy) = other {
                    self.logger.log(&LogEvent::MaxIterationsReached {
                        iterations: iteration,
                        policy: policy.to_string(),
                    });
                }
                update = update.record(IterationRecord::new(state, verdict, to, other.source()));
            }
        }

        store.apply(update)?;
        self.log_transition(iteration, ReviewStatus::InReview, to);
        if to != ReviewStatus::Escalated {
            self.write_session_entry(store.get());
        }

        Ok(Step::Advanced)
    }

    /// ESCALATED: wait for the external reviewer and resolve
    async fn escalation_step(&self, store: &mut StateStore) -> Result<Step, LoopError> {
        let state = store.get();
        let iteration = state.iteration;
        let verdict = state
            .verdict
            .clone()
            .ok_or(StateError::MissingVerdict(state.status))?;

        let decision = match self.escalation {
            Some(channel) => {
                let call = async {
                    match self.config.escalation_timeout {
                        Some(limit) => tokio::time::timeout(limit, channel.escalate(state, &verdict))
                            .await
                            .unwrap_or(Err(crate::EscalationError::Timeout(limit))),
                        None => channel.escalate(state, &verdict).await,
                    }
                };
                let result = tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(Step::Cancelled),
                    result = call => result,
                };
                result.unwrap_or_else(|e| {
                    warn!(iteration, channel = channel.name(), error = %e, "Escalation failed, treating as rejection");
                    ExternalDecision::reject(e.to_string())
                })
            }
            None => {
                warn!(iteration, "Escalated state without an escalation channel");
                ExternalDecision::reject("no escalation channel configured")
            }
        };

        self.logger.log(&LogEvent::EscalationResolved {
            iteration,
            approved: decision.approved,
            note: decision.note.clone().unwrap_or_default(),
        });

        let to = self.engine.resolve_escalation(state, &decision);
        let mut record = IterationRecord::new(state, verdict, to, DecisionSource::Reviewer);
        record.reviewer_note = decision.note.clone();

        store.apply(
            StateUpdate::new()
                .status(to)
                .reviewer_note(decision.note)
                .record(record),
        )?;
        self.log_transition(iteration, ReviewStatus::Escalated, to);
        self.write_session_entry(store.get());

        Ok(Step::Advanced)
    }

    /// Budget exhausted outside of a review step
    fn force_stop_step(&self, store: &mut StateStore) -> Result<Step, LoopError> {
        let state = store.get();
        let from = state.status;
        let verdict = state
            .verdict
            .clone()
            .ok_or(StateError::MissingVerdict(from))?;
        let policy = self.engine.policy().force_stop;
        let decision = Decision::ForceStop(policy);
        let to = decision.next_status();

        self.logger.log(&LogEvent::MaxIterationsReached {
            iterations: state.iteration,
            policy: policy.to_string(),
        });

        let record = IterationRecord::new(state, verdict, to, decision.source());
        let iteration = state.iteration;
        store.apply(StateUpdate::new().status(to).record(record))?;
        self.log_transition(iteration, from, to);

        Ok(Step::Advanced)
    }

    fn log_transition(&self, iteration: usize, from: ReviewStatus, to: ReviewStatus) {
        debug!(iteration, from = %from, to = %to, "Status changed");
        self.logger.log(&LogEvent::StatusChanged {
            iteration,
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    fn write_session_entry(&self, state: &WorkflowState) {
        let (Some(session), Some(record)) = (&self.session, state.history.last()) else {
            return;
        };
        session.write_iteration(IterationEntry {
            iteration: record.iteration,
            artifact: state.artifact.clone(),
            weighted_score: record.verdict.weighted_score,
            passed: record.verdict.passed,
            scores: record.verdict.scores.clone(),
            conflicts: record.verdict.conflicts.iter().map(|c| c.describe()).collect(),
            status: record.status.to_string(),
            feedback: record.verdict.feedback.clone(),
            timestamp: Utc::now(),
        });
    }

    fn save_checkpoint(&self, state: &WorkflowState) {
        if let Some(checkpoint) = &self.checkpoint {
            if let Err(e) = checkpoint.save(state) {
                warn!(error = %e, "Failed to save checkpoint");
            }
        }
    }

    fn finished(&self, store: StateStore, start: Instant) -> LoopOutcome {
        let state = store.into_inner();
        let duration = start.elapsed();
        let weighted_score = state.verdict.as_ref().map(|v| v.weighted_score);

        self.logger.log(&LogEvent::LoopCompleted {
            iterations: state.iteration,
            status: state.status.to_string(),
            weighted_score,
            duration_secs: duration.as_secs_f64(),
        });

        let outcome = match state.status {
            ReviewStatus::Approved => {
                let forced = state
                    .history
                    .last()
                    .is_some_and(|r| r.decided_by == DecisionSource::ForceStop);
                LoopOutcome::approved(state, forced, duration)
            }
            _ => LoopOutcome::rejected(state, duration),
        };
        self.write_session_end(&outcome);
        outcome
    }

    fn cancelled(&self, store: StateStore, start: Instant) -> LoopOutcome {
        let state = store.into_inner();
        info!(iteration = state.iteration, "Loop cancelled");
        self.logger.log(&LogEvent::LoopCancelled {
            iterations: state.iteration,
        });
        let outcome = LoopOutcome::cancelled(state, start.elapsed());
        self.write_session_end(&outcome);
        outcome
    }

    fn failed(&self, store: StateStore, error: String, start: Instant) -> LoopOutcome {
        let outcome = LoopOutcome::failed(store.into_inner(), error, start.elapsed());
        self.write_session_end(&outcome);
        outcome
    }

    fn write_session_end(&self, outcome: &LoopOutcome) {
        if let Some(session) = &self.session {
            session.write_end(
                outcome.label(),
                outcome.iterations(),
                outcome.weighted_score(),
                outcome.duration_secs(),
            );
        }
    }
}
