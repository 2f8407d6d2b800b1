//! Project configuration file support for revloop.
//!
//! Loads configuration from `revloop.toml` in the working directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use revloop_core::ForceStopPolicy;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "revloop.toml";

/// Project-level configuration loaded from `revloop.toml`
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Task to work on when none is given on the command line
    pub task: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,
    /// Command that produces artifacts
    #[serde(default)]
    pub producer: CommandSpec,
    /// Evaluators to register. Empty means the built-in critic panel.
    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,
    pub sandbox: Option<SandboxConfig>,
    #[serde(default)]
    pub escalation: EscalationConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoopSettings {
    pub max_iterations: usize,
    pub pass_threshold: f64,
    pub conflict_spread: f64,
    /// Escalate when the weighted score falls below this
    pub human_review_threshold: Option<f64>,
    /// Send every cycle through the escalation gate
    pub require_human_review: bool,
    pub escalate_on_conflict: bool,
    pub force_stop: Option<ForceStopPolicy>,
    pub producer_retries: u32,
    #[serde(with = "humantime_serde")]
    pub producer_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub evaluator_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub escalation_timeout: Option<Duration>,
    /// Score substituted for an evaluator that produced no usable result
    pub fallback_score: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            pass_threshold: 7.0,
            conflict_spread: 3.0,
            human_review_threshold: None,
            require_human_review: false,
            escalate_on_conflict: true,
            force_stop: None,
            producer_retries: 2,
            producer_timeout: Some(Duration::from_secs(300)),
            evaluator_timeout: Some(Duration::from_secs(120)),
            escalation_timeout: None,
            fallback_score: 5.0,
        }
    }
}

/// An external command plus its arguments
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the command
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--print".to_string()],
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    /// Scores through a generation service prompted with criteria
    Critic,
    /// Runs the artifact in the configured sandbox
    Sandbox,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorConfig {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub kind: EvaluatorKind,
    /// Critic command; defaults to the producer command
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the critic command; ignored without `command`
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub criteria: Option<String>,
    pub pass_score: Option<f64>,
    /// Sandbox evaluators only: required stdout
    pub expected_stdout: Option<String>,
}

fn default_weight() -> f64 {
    revloop_critic::DEFAULT_WEIGHT
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_sandbox_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_sandbox_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// Ask on the terminal
    Interactive,
    /// Approve automatically at or above `approve_at`, which defaults to
    /// `loop.pass_threshold`
    #[default]
    Threshold,
    /// No gate; escalation conditions are ignored
    None,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EscalationConfig {
    pub mode: EscalationMode,
    pub approve_at: Option<f64>,
}

impl ProjectConfig {
    /// Load configuration from the working directory.
    ///
    /// Returns:
    /// - `Ok(Some(config))` if file exists and parses successfully
    /// - `Ok(None)` if file does not exist
    /// - `Err(...)` if file exists but fails to parse or validate (hard error)
    pub fn load(working_dir: &Path) -> Result<Option<Self>> {
        let config_path = working_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(Some(config))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: ProjectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let settings = &self.loop_settings;
        if settings.max_iterations == 0 {
            bail!("loop.max_iterations must be at least 1");
        }
        if settings.conflict_spread.is_nan() || settings.conflict_spread < 0.0 {
            bail!("loop.conflict_spread must not be negative");
        }
        check_score("loop.pass_threshold", settings.pass_threshold)?;
        check_score("loop.fallback_score", settings.fallback_score)?;
        if let Some(threshold) = settings.human_review_threshold {
            check_score("loop.human_review_threshold", threshold)?;
            if threshold >= settings.pass_threshold {
                bail!(
                    "loop.human_review_threshold ({}) must be below loop.pass_threshold ({})",
                    threshold,
                    settings.pass_threshold
                );
            }
        }
        if let Some(approve_at) = self.escalation.approve_at {
            check_score("escalation.approve_at", approve_at)?;
        }
        if self
            .evaluators
            .iter()
            .any(|e| e.kind == EvaluatorKind::Sandbox)
            && self.sandbox.is_none()
        {
            bail!("sandbox evaluators need a [sandbox] section");
        }
        Ok(())
    }

    /// Score at which the threshold reviewer approves an escalated cycle
    pub fn approve_at(&self) -> f64 {
        self.escalation
            .approve_at
            .unwrap_or(self.loop_settings.pass_threshold)
    }

    /// Evaluators to register: the configured list, or the default critic
    /// panel when none are configured.
    pub fn effective_evaluators(&self) -> Vec<EvaluatorConfig> {
        if !self.evaluators.is_empty() {
            return self.evaluators.clone();
        }

        let critic = |id: &str, weight: f64, criteria: &str| EvaluatorConfig {
            id: id.to_string(),
            weight,
            kind: EvaluatorKind::Critic,
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            criteria: Some(criteria.to_string()),
            pass_score: None,
            expected_stdout: None,
        };

        vec![
            critic(
                "security",
                0.4,
                "Security: input validation, injection risks, unsafe operations, secret handling.",
            ),
            critic(
                "performance",
                0.35,
                "Performance: algorithmic complexity, unnecessary work, resource usage.",
            ),
            critic(
                "style",
                0.25,
                "Style: readability, naming, structure, documentation.",
            ),
        ]
    }
}

/// Scores live on the 0-10 scale
fn check_score(key: &str, value: f64) -> Result<()> {
    if !(0.0..=10.0).contains(&value) {
        bail!("{} must be between 0 and 10, got {}", key, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(ProjectConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_full_config() {
        let config = ProjectConfig::parse(
            r#"
task = "Write a prime sieve"
requirements = ["Handle n < 2"]

[loop]
max_iterations = 5
pass_threshold = 8.0
force_stop = "approve"
producer_timeout = "2m"
escalation_timeout = "30s"

[producer]
command = "llm"
args = ["-m", "gpt-4o"]
env = { LLM_USER_PATH = "/tmp/llm" }

[[evaluators]]
id = "security"
weight = 0.6
kind = "critic"
criteria = "Look for injection"

[[evaluators]]
id = "tests"
kind = "sandbox"
expected_stdout = "ok"

[sandbox]
command = "python3"
args = ["-"]
timeout = "10s"

[escalation]
mode = "interactive"
"#,
        )
        .unwrap();

        assert_eq!(config.task.as_deref(), Some("Write a prime sieve"));
        assert_eq!(config.loop_settings.max_iterations, 5);
        assert_eq!(config.loop_settings.force_stop, Some(ForceStopPolicy::Approve));
        assert_eq!(
            config.loop_settings.producer_timeout,
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            config.loop_settings.escalation_timeout,
            Some(Duration::from_secs(30))
        );
        // Unset keys keep their defaults
        assert_eq!(config.loop_settings.conflict_spread, 3.0);
        assert_eq!(config.producer.command, "llm");
        assert_eq!(config.evaluators.len(), 2);
        assert_eq!(config.evaluators[1].weight, 1.0);
        assert_eq!(config.evaluators[1].kind, EvaluatorKind::Sandbox);
        assert_eq!(config.sandbox.as_ref().unwrap().timeout, Duration::from_secs(10));
        assert_eq!(config.escalation.mode, EscalationMode::Interactive);
        assert_eq!(
            config.producer.env.get("LLM_USER_PATH").map(String::as_str),
            Some("/tmp/llm")
        );
        assert!(config.evaluators[0].env.is_empty());
        // Threshold reviewer follows the pass threshold unless told otherwise
        assert_eq!(config.escalation.approve_at, None);
        assert_eq!(config.approve_at(), 8.0);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = ProjectConfig::parse("[loop]\nmax_iteration = 3\n").unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_sandbox_evaluator_requires_sandbox() {
        let err = ProjectConfig::parse(
            r#"
[[evaluators]]
id = "run"
kind = "sandbox"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("[sandbox]"));
    }

    #[test]
    fn test_default_panel() {
        let config = ProjectConfig::default();
        let evaluators = config.effective_evaluators();
        let ids: Vec<&str> = evaluators.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["security", "performance", "style"]);
        assert_eq!(config.loop_settings.force_stop, None);
        assert_eq!(config.escalation.mode, EscalationMode::Threshold);
        assert_eq!(config.approve_at(), config.loop_settings.pass_threshold);
    }

    #[test]
    fn test_explicit_approve_at_wins() {
        let config = ProjectConfig::parse("[escalation]\napprove_at = 6.5\n").unwrap();
        assert_eq!(config.approve_at(), 6.5);
    }

    #[test]
    fn test_human_review_threshold_must_be_below_pass_threshold() {
        let err = ProjectConfig::parse(
            "[loop]\npass_threshold = 7.0\nhuman_review_threshold = 7.0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be below loop.pass_threshold"));

        let config = ProjectConfig::parse(
            "[loop]\npass_threshold = 7.0\nhuman_review_threshold = 4.0\n",
        )
        .unwrap();
        assert_eq!(config.loop_settings.human_review_threshold, Some(4.0));
    }

    #[test]
    fn test_scores_must_be_on_scale() {
        for content in [
            "[loop]\npass_threshold = 11.0\n",
            "[loop]\npass_threshold = nan\n",
            "[loop]\nfallback_score = -1.0\n",
            "[loop]\nfallback_score = inf\n",
            "[loop]\nconflict_spread = nan\n",
            "[escalation]\napprove_at = 12.0\n",
        ] {
            assert!(ProjectConfig::parse(content).is_err(), "accepted {:?}", content);
        }
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "task = [").unwrap();
        assert!(ProjectConfig::load(dir.path()).is_err());
    }
}
