use async_trait::async_trait;
use revloop_service::GenerationService;
use std::sync::Arc;
use tracing::debug;

use crate::{Assessment, EvaluationError, EvaluationInput, Evaluator, ReviewPrompts};

/// Evaluator that asks a generation service to score the artifact
/// against a fixed set of criteria.
pub struct CriticEvaluator {
    service: Arc<dyn GenerationService>,
    criteria: String,
    pass_score: f64,
}

impl CriticEvaluator {
    pub fn new(service: Arc<dyn GenerationService>, criteria: impl Into<String>) -> Self {
        Self {
            service,
            criteria: criteria.into(),
            pass_score: 7.0,
        }
    }

    /// Score at or above which this critic reports `passed`
    pub fn with_pass_score(mut self, pass_score: f64) -> Self {
        self.pass_score = pass_score;
        self
    }
}

#[async_trait]
impl Evaluator for CriticEvaluator {
    fn name(&self) -> &str {
        "critic"
    }

    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Option<Assessment>, EvaluationError> {
        let prompt = ReviewPrompts::build_evaluation_prompt(input, &self.criteria);

        debug!(
            service = self.service.name(),
            prompt_len = prompt.len(),
            iteration = input.iteration,
            "Running critic evaluation"
        );

        let output = self.service.generate(&prompt).await?;
        let assessment = Assessment::parse(&output, self.pass_score)?;
        Ok(Some(assessment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use revloop_service::ServiceError;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, ()>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationService for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
            self.seen.lock().unwrap().push(prompt.to_string());
            self.reply
                .clone()
                .map_err(|_| ServiceError::RateLimited("slow down".into()))
        }
    }

    fn input() -> EvaluationInput<'static> {
        EvaluationInput {
            task: "reverse a string",
            requirements: &[],
            artifact: "def rev(s): return s[::-1]",
            iteration: 2,
        }
    }

    #[tokio::test]
    async fn test_critic_parses_service_reply() {
        let service = Arc::new(Canned {
            reply: Ok(r#"<evaluation>{"score": 6, "feedback": "no types"}</evaluation>"#.into()),
            seen: Mutex::new(vec![]),
        });
        let critic = CriticEvaluator::new(service.clone(), "Type hints present");

        let assessment = critic.evaluate(input()).await.unwrap().unwrap();

        assert_eq!(assessment.score, 6.0);
        assert!(!assessment.passed);
        let prompts = service.seen.lock().unwrap();
        assert!(prompts[0].contains("Type hints present"));
        assert!(prompts[0].contains("def rev(s)"));
    }

    #[tokio::test]
    async fn test_critic_surfaces_unparseable_reply() {
        let service = Arc::new(Canned {
            reply: Ok("I like it".into()),
            seen: Mutex::new(vec![]),
        });
        let critic = CriticEvaluator::new(service, "anything");
        let err = critic.evaluate(input()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::Parse(_)));
    }

    #[tokio::test]
    async fn test_critic_surfaces_service_error() {
        let service = Arc::new(Canned {
            reply: Err(()),
            seen: Mutex::new(vec![]),
        });
        let critic = CriticEvaluator::new(service, "anything");
        let err = critic.evaluate(input()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::Service(_)));
    }
}
