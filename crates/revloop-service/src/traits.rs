use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::ExecutionOutput;

/// Errors raised by an external service call
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Failed to spawn service process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Service call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service is rate limited: {0}")]
    RateLimited(String),

    #[error("Service returned an empty response")]
    EmptyResponse,

    #[error("Service execution failed: {0}")]
    ExecutionFailed(String),
}

impl ServiceError {
    /// Whether repeating the same call may succeed.
    ///
    /// Spawn failures will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::Timeout(_)
                | ServiceError::RateLimited(_)
                | ServiceError::EmptyResponse
                | ServiceError::ExecutionFailed(_)
        )
    }
}

/// Configuration for running a service process
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Working directory for the process
    pub working_dir: PathBuf,
    /// Optional timeout (None = no limit)
    pub timeout: Option<Duration>,
    /// Additional environment variables
    pub env_vars: HashMap<String, String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            timeout: None,
            env_vars: HashMap::new(),
        }
    }
}

impl CommandConfig {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Extra environment variables for the process, on top of the inherited ones
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Text generation backend used by producers and critic evaluators
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Human-readable name of the service
    fn name(&self) -> &str;

    /// Generate a completion for the given prompt
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

/// Isolated code runner used by evaluators that check runnable artifacts.
///
/// Resource and network isolation belong to the implementation; callers
/// only see the captured output.
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Human-readable name of the sandbox
    fn name(&self) -> &str;

    /// Run `code`, giving up after `timeout`
    async fn execute(&self, code: &str, timeout: Duration)
        -> Result<ExecutionOutput, ServiceError>;
}
