use async_trait::async_trait;
use revloop_critic::ReviewPrompts;
use revloop_service::{GenerationService, ServiceError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::WorkflowState;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Generation service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Producer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Producer failed: {0}")]
    Failed(String),
}

impl ProducerError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProducerError::Service(e) => e.is_transient(),
            ProducerError::Timeout(_) => true,
            ProducerError::Failed(_) => false,
        }
    }
}

/// Turns the current state into the next artifact version
#[async_trait]
pub trait Producer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a first draft when the state has no verdict yet, otherwise a
    /// revision addressing the last verdict's feedback.
    async fn produce(&self, state: &WorkflowState) -> Result<String, ProducerError>;
}

/// Producer backed by a text generation service
pub struct GeneratingProducer {
    service: Arc<dyn GenerationService>,
}

impl GeneratingProducer {
    pub fn new(service: Arc<dyn GenerationService>) -> Self {
        Self { service }
    }

    fn build_prompt(state: &WorkflowState) -> String {
        match state.revision_feedback() {
            Some(verdict) if !state.artifact.is_empty() => ReviewPrompts::build_revision_prompt(
                &state.task,
                &state.requirements,
                &state.artifact,
                &verdict,
            ),
            _ => ReviewPrompts::build_initial_prompt(&state.task, &state.requirements),
        }
    }
}

#[async_trait]
impl Producer for GeneratingProducer {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn produce(&self, state: &WorkflowState) -> Result<String, ProducerError> {
        let prompt = Self::build_prompt(state);
        tracing::debug!(
            producer = self.service.name(),
            prompt_len = prompt.len(),
            "Requesting artifact"
        );
        let output = self.service.generate(&prompt).await?;
        Ok(extract_artifact(&output))
    }
}

/// Pull the artifact out of raw generator output.
///
/// Returns the body of the first fenced code block when there is one,
/// otherwise the trimmed output.
pub fn extract_artifact(output: &str) -> String {
    if let Some(start) = output.find("```") {
        let after_fence = &output[start + 3..];
        // Skip the language tag
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim_end().to_string();
        }
    }
    output.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use revloop_critic::AggregateVerdict;
    use std::sync::Mutex;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl GenerationService for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_extract_fenced_artifact() {
        let output = "Here you go:\n```python\ndef hello():\n    print('hi')\n```\nDone.";
        assert_eq!(extract_artifact(output), "def hello():\n    print('hi')");
    }

    #[test]
    fn test_extract_plain_artifact() {
        assert_eq!(extract_artifact("  plain text \n"), "plain text");
        // Unterminated fence falls back to the whole output
        assert_eq!(extract_artifact("```rust\nfn main"), "```rust\nfn main");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProducerError::Service(ServiceError::EmptyResponse).is_transient());
        assert!(ProducerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProducerError::Failed("bad".into()).is_transient());
        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(!ProducerError::Service(ServiceError::SpawnFailed(missing)).is_transient());
    }

    #[tokio::test]
    async fn test_revision_prompt_carries_feedback() {
        let service = Arc::new(Recording {
            prompts: Mutex::new(Vec::new()),
            reply: "```\nv2\n```".into(),
        });
        let producer = GeneratingProducer::new(service.clone());

        let mut state = WorkflowState::new("Write a greeting", 3);
        assert_eq!(producer.produce(&state).await.unwrap(), "v2");

        state.artifact = "v1".into();
        state.verdict = Some(AggregateVerdict {
            weighted_score: 4.0,
            passed: false,
            conflicts: vec![],
            feedback: "[style] too terse".into(),
            suggestions: vec!["add a docstring".into()],
            scores: Default::default(),
        });
        producer.produce(&state).await.unwrap();

        let prompts = service.prompts.lock().unwrap();
        assert!(!prompts[0].contains("Previous Attempt"));
        assert!(prompts[1].contains("Previous Attempt"));
        assert!(prompts[1].contains("[style] too terse"));
        assert!(prompts[1].contains("add a docstring"));
    }
}
