use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{EvaluationError, EvaluationInput, EvaluationResult, Evaluator};

/// Weight given to an evaluator registered without an explicit weight
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Score substituted for a failed evaluator unless configured otherwise
const DEFAULT_FALLBACK_SCORE: f64 = 5.0;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("Evaluator id must not be empty")]
    EmptyId,

    #[error("Evaluator '{0}' is already registered")]
    DuplicateId(String),

    #[error("Evaluator '{id}' has invalid weight {weight}; weights must be positive")]
    InvalidWeight { id: String, weight: f64 },
}

struct RegisteredEvaluator {
    id: String,
    weight: f64,
    evaluator: Arc<dyn Evaluator>,
}

/// Registry of independent evaluators keyed by a stable id.
///
/// Every call to [`EvaluatorSet::evaluate_all`] yields exactly one result per
/// registered evaluator, in registration order.
pub struct EvaluatorSet {
    entries: Vec<RegisteredEvaluator>,
    timeout: Option<Duration>,
    fallback_score: f64,
}

impl Default for EvaluatorSet {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluatorSet {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            timeout: None,
            fallback_score: DEFAULT_FALLBACK_SCORE,
        }
    }

    /// Per-evaluator call timeout. A timed-out evaluator gets a fallback result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fallback_score(mut self, score: f64) -> Self {
        self.fallback_score = score;
        self
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        weight: f64,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<(), RegistryError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RegistryError::InvalidWeight { id, weight });
        }
        if self.entries.iter().any(|e| e.id == id) {
            return Err(RegistryError::DuplicateId(id));
        }

        debug!(evaluator = %id, weight, kind = evaluator.name(), "Registered evaluator");
        self.entries.push(RegisteredEvaluator {
            id,
            weight,
            evaluator,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn weights(&self) -> HashMap<String, f64> {
        self.entries
            .iter()
            .map(|e| (e.id.clone(), e.weight))
            .collect()
    }

    /// Run every evaluator concurrently against the same snapshot and wait
    /// for all of them. Failures, timeouts and panics become fallback results.
    pub async fn evaluate_all(&self, input: EvaluationInput<'_>) -> Vec<EvaluationResult> {
        debug!(
            evaluators = self.entries.len(),
            iteration = input.iteration,
            "Fanning out evaluation"
        );
        join_all(self.entries.iter().map(|entry| self.evaluate_one(entry, input))).await
    }

    async fn evaluate_one(
        &self,
        entry: &RegisteredEvaluator,
        input: EvaluationInput<'_>,
    ) -> EvaluationResult {
        let call = AssertUnwindSafe(entry.evaluator.evaluate(input)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Ok(Err(EvaluationError::Timeout(limit))),
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(Some(assessment))) => EvaluationResult::scored(&entry.id, assessment),
            Ok(Ok(None)) => {
                debug!(evaluator = %entry.id, "Evaluator abstained");
                EvaluationResult::abstained(&entry.id)
            }
            Ok(Err(e)) => {
                warn!(evaluator = %entry.id, error = %e, "Evaluator failed, substituting fallback");
                EvaluationResult::fallback(&entry.id, self.fallback_score, &e.to_string())
            }
            Err(_) => {
                warn!(evaluator = %entry.id, "Evaluator panicked, substituting fallback");
                EvaluationResult::fallback(&entry.id, self.fallback_score, "evaluator panicked")
            }
        }
    }
}
