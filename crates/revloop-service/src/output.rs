use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Output captured from a service process or sandbox run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutput {
    /// Combined stdout output
    pub stdout: String,
    /// Combined stderr output
    pub stderr: String,
    /// Exit code from the process (-1 when killed or unknown)
    pub exit_code: i32,
    /// Duration of execution
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Whether the run was cut short by its timeout
    #[serde(default)]
    pub timed_out: bool,
}

impl ExecutionOutput {
    pub fn new(stdout: String, stderr: String, exit_code: i32, duration: Duration) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            duration,
            timed_out: false,
        }
    }

    /// Output for a run that was killed after `limit`
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("execution timed out after {:?}", limit),
            exit_code: -1,
            duration: limit,
            timed_out: true,
        }
    }

    /// Check if the process exited successfully
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}
