use async_trait::async_trait;
use revloop_service::ExecutionSandbox;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{Assessment, EvaluationError, EvaluationInput, Evaluator, MAX_SCORE};

/// Evaluator that runs the artifact in a sandbox and scores runnable
/// correctness: full marks for a clean exit (and matching output when an
/// expectation is set), zero otherwise.
pub struct SandboxEvaluator {
    sandbox: Arc<dyn ExecutionSandbox>,
    timeout: Duration,
    expected_stdout: Option<String>,
}

impl SandboxEvaluator {
    pub fn new(sandbox: Arc<dyn ExecutionSandbox>, timeout: Duration) -> Self {
        Self {
            sandbox,
            timeout,
            expected_stdout: None,
        }
    }

    pub fn with_expected_stdout(mut self, expected: impl Into<String>) -> Self {
        self.expected_stdout = Some(expected.into());
        self
    }
}

#[async_trait]
impl Evaluator for SandboxEvaluator {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn evaluate(
        &self,
        input: EvaluationInput<'_>,
    ) -> Result<Option<Assessment>, EvaluationError> {
        debug!(
            sandbox = self.sandbox.name(),
            iteration = input.iteration,
            "Executing artifact"
        );

        let output = self.sandbox.execute(input.artifact, self.timeout).await?;

        info!(
            exit_code = output.exit_code,
            timed_out = output.timed_out,
            duration_secs = output.duration.as_secs_f64(),
            "Sandbox run completed"
        );

        if output.timed_out {
            return Ok(Some(
                Assessment::new(0.0, false, format!("Execution timed out after {:?}", self.timeout))
                    .with_suggestions(vec![
                        "Remove blocking calls or unbounded loops".to_string(),
                    ]),
            ));
        }

        if !output.success() {
            return Ok(Some(
                Assessment::new(
                    0.0,
                    false,
                    format!(
                        "Execution failed with exit code {}:\n{}",
                        output.exit_code, output.stderr
                    ),
                )
                .with_suggestions(vec!["Fix the runtime error shown above".to_string()]),
            ));
        }

        if let Some(expected) = &self.expected_stdout {
            if output.stdout.trim() != expected.trim() {
                return Ok(Some(
                    Assessment::new(
                        0.0,
                        false,
                        format!(
                            "Output mismatch.\nExpected:\n{}\nActual:\n{}",
                            expected.trim(),
                            output.stdout.trim()
                        ),
                    )
                    .with_suggestions(vec![
                        "Make the program print exactly the expected output".to_string(),
                    ]),
                ));
            }
        }

        Ok(Some(Assessment::new(
            MAX_SCORE,
            true,
            "Executed successfully",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revloop_service::{ExecutionOutput, ServiceError};

    struct FixedSandbox(ExecutionOutput);

    #[async_trait]
    impl ExecutionSandbox for FixedSandbox {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn execute(
            &self,
            _code: &str,
            _timeout: Duration,
        ) -> Result<ExecutionOutput, ServiceError> {
            Ok(self.0.clone())
        }
    }

    fn input() -> EvaluationInput<'static> {
        EvaluationInput {
            task: "print 42",
            requirements: &[],
            artifact: "print(42)",
            iteration: 1,
        }
    }

    fn run(output: ExecutionOutput) -> SandboxEvaluator {
        SandboxEvaluator::new(Arc::new(FixedSandbox(output)), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_clean_exit_scores_full_marks() {
        let evaluator = run(ExecutionOutput::new(
            "42".into(),
            String::new(),
            0,
            Duration::from_millis(5),
        ))
        .with_expected_stdout("42\n");
        let assessment = evaluator.evaluate(input()).await.unwrap().unwrap();
        assert_eq!(assessment.score, MAX_SCORE);
        assert!(assessment.passed);
    }

    #[tokio::test]
    async fn test_nonzero_exit_scores_zero() {
        let evaluator = run(ExecutionOutput::new(
            String::new(),
            "NameError: x".into(),
            1,
            Duration::from_millis(5),
        ));
        let assessment = evaluator.evaluate(input()).await.unwrap().unwrap();
        assert_eq!(assessment.score, 0.0);
        assert!(assessment.feedback.contains("NameError"));
    }

    #[tokio::test]
    async fn test_output_mismatch_scores_zero() {
        let evaluator = run(ExecutionOutput::new(
            "41".into(),
            String::new(),
            0,
            Duration::from_millis(5),
        ))
        .with_expected_stdout("42");
        let assessment = evaluator.evaluate(input()).await.unwrap().unwrap();
        assert!(!assessment.passed);
        assert!(assessment.feedback.contains("Output mismatch"));
    }

    #[tokio::test]
    async fn test_timeout_scores_zero() {
        let evaluator = run(ExecutionOutput::timed_out(Duration::from_secs(5)));
        let assessment = evaluator.evaluate(input()).await.unwrap().unwrap();
        assert_eq!(assessment.score, 0.0);
        assert!(assessment.feedback.contains("timed out"));
    }
}
