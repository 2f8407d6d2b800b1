use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{CommandConfig, ExecutionOutput, ExecutionSandbox, ProcessSpawner, ServiceError};

/// Sandbox that pipes code into an interpreter command.
///
/// Isolation comes from the command itself, for example
/// `docker run --rm -i --network none --memory 256m python:3.11-slim python -`.
pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
    config: CommandConfig,
}

impl ProcessSandbox {
    pub fn new(program: PathBuf, args: Vec<String>, config: CommandConfig) -> Self {
        Self {
            program,
            args,
            config,
        }
    }
}

#[async_trait]
impl ExecutionSandbox for ProcessSandbox {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<ExecutionOutput, ServiceError> {
        debug!(
            program = %self.program.display(),
            code_len = code.len(),
            timeout_secs = timeout.as_secs_f64(),
            "Executing code in sandbox"
        );

        let config = self.config.clone().with_timeout(timeout);
        match ProcessSpawner::spawn(&self.program, &self.args, Some(code), &config).await {
            Ok(output) => Ok(output),
            Err(ServiceError::Timeout(limit)) => {
                warn!(timeout = ?limit, "Sandboxed execution timed out");
                Ok(ExecutionOutput::timed_out(limit))
            }
            Err(e) => Err(e),
        }
    }
}
