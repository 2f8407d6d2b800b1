mod checkpoint;
mod decision;
mod error;
mod escalation;
mod loop_runner;
mod outcome;
mod producer;
mod state;
mod store;

pub use checkpoint::{CheckpointError, FileCheckpoint};
pub use decision::{
    Decision, DecisionEngine, DecisionPolicy, EscalationPolicy, EscalationReason, ForceStopPolicy,
};
pub use error::LoopError;
pub use escalation::{
    EscalationChannel, EscalationError, ExternalDecision, ThresholdReviewer, DEFAULT_APPROVE_AT,
};
pub use loop_runner::{LoopRunner, RunnerConfig};
pub use outcome::LoopOutcome;
pub use producer::{extract_artifact, GeneratingProducer, Producer, ProducerError};
pub use state::{DecisionSource, IterationRecord, ReviewStatus, WorkflowState};
pub use store::{ListMerge, MergePolicy, StateError, StateStore, StateUpdate};

pub use tokio_util::sync::CancellationToken;
