use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::{CommandConfig, GenerationService, ProcessSpawner, ServiceError};

/// Generation service backed by an external command.
///
/// The prompt is written to the command's stdin and its stdout is the
/// completion, e.g. `llm -m gpt-4o` or a wrapper script around a hosted API.
pub struct CommandService {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    config: CommandConfig,
}

impl CommandService {
    pub fn new(program: PathBuf, args: Vec<String>, config: CommandConfig) -> Self {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            name,
            program,
            args,
            config,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl GenerationService for CommandService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        debug!(
            service = self.name(),
            prompt_len = prompt.len(),
            "Requesting generation"
        );

        let output =
            ProcessSpawner::spawn(&self.program, &self.args, Some(prompt), &self.config).await?;

        if !output.success() {
            let stderr = output.stderr.to_lowercase();
            if stderr.contains("rate limit") || stderr.contains("429") {
                return Err(ServiceError::RateLimited(output.stderr));
            }
            return Err(ServiceError::ExecutionFailed(format!(
                "{} exited with code {}: {}",
                self.name, output.exit_code, output.stderr
            )));
        }

        let text = output.stdout.trim();
        if text.is_empty() {
            return Err(ServiceError::EmptyResponse);
        }

        Ok(text.to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandService {
        CommandService::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), script.to_string()],
            CommandConfig::new(std::env::temp_dir()),
        )
    }

    #[tokio::test]
    async fn test_generate_returns_trimmed_stdout() {
        let service = shell("cat; echo");
        let text = service.generate("  hello  ").await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_generate_empty_output_is_error() {
        let service = shell("cat > /dev/null");
        let err = service.generate("prompt").await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyResponse));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_generate_detects_rate_limit() {
        let service = shell("echo 'HTTP 429: rate limit exceeded' >&2; exit 1");
        let err = service.generate("prompt").await.unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited(_)));
    }

    #[test]
    fn test_name_defaults_to_program_file_name() {
        let service = CommandService::new(
            PathBuf::from("/usr/local/bin/llm"),
            vec![],
            CommandConfig::default(),
        );
        assert_eq!(service.name(), "llm");
        assert_eq!(service.with_name("writer").name(), "writer");
    }
}
