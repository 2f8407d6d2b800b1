use revloop_critic::RegistryError;
use thiserror::Error;

use crate::{ProducerError, StateError};

#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Producer error: {0}")]
    Producer(#[from] ProducerError),

    #[error("Producer returned an empty artifact in iteration {iteration}")]
    EmptyArtifact { iteration: usize },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Expected {expected} evaluation results, got {actual}")]
    PartialAggregation { expected: usize, actual: usize },

    #[error("Evaluator registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
