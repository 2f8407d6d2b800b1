mod config;
mod escalation;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};

use revloop_core::{
    DecisionPolicy, EscalationChannel, EscalationPolicy, FileCheckpoint, ForceStopPolicy,
    GeneratingProducer, LoopOutcome, LoopRunner, RunnerConfig, ThresholdReviewer, WorkflowState,
};
use revloop_critic::{Aggregator, CriticEvaluator, Evaluator, EvaluatorSet, SandboxEvaluator};
use revloop_logging::{LogFormat, Logger, SessionWriter};
use revloop_service::{CommandConfig, CommandService, GenerationService, ProcessSandbox};

use config::{EscalationMode, EvaluatorKind, ProjectConfig};
use escalation::TerminalReviewer;

/// Policy used when neither the CLI nor the config file picks one
const DEFAULT_FORCE_STOP: ForceStopPolicy = ForceStopPolicy::Reject;

#[derive(Parser, Debug)]
#[command(
    name = "revloop",
    about = "Bounded generate/evaluate/decide review loop",
    version,
    author
)]
struct Cli {
    /// Task description (or reads from task.md / revloop.toml if not provided)
    #[arg(short, long)]
    task: Option<String>,

    /// Path to task file (default: ./task.md)
    #[arg(long, default_value = "task.md")]
    task_file: PathBuf,

    /// Working directory (default: current directory)
    #[arg(short = 'd', long)]
    working_dir: Option<PathBuf>,

    /// Maximum produce/evaluate cycles
    #[arg(short = 'n', long)]
    max_iterations: Option<usize>,

    /// What to do when the budget runs out without a passing verdict
    #[arg(long, value_enum)]
    force_stop: Option<ForceStopChoice>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormatChoice,

    /// Also write loop events as JSON lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Output final result as JSON
    #[arg(long)]
    json_output: bool,

    /// Dry run: show what would happen without executing
    #[arg(long)]
    dry_run: bool,

    /// Save workflow state to this file after every step
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Resume from the checkpoint file instead of starting fresh
    #[arg(long, requires = "checkpoint")]
    resume: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ForceStopChoice {
    Reject,
    Approve,
}

impl From<ForceStopChoice> for ForceStopPolicy {
    fn from(choice: ForceStopChoice) -> Self {
        match choice {
            ForceStopChoice::Reject => ForceStopPolicy::Reject,
            ForceStopChoice::Approve => ForceStopPolicy::Approve,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let working_dir = match cli.working_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_format: LogFormat = cli.log_format.into();
    let log_dir = dirs::data_dir().map(|d| d.join("revloop").join("logs"));
    let guard = revloop_logging::init_tracing("warn", log_format, log_dir.as_deref());

    let config = ProjectConfig::load(&working_dir)?.unwrap_or_default();
    let settings = &config.loop_settings;

    let force_stop = cli
        .force_stop
        .map(ForceStopPolicy::from)
        .or(settings.force_stop)
        .unwrap_or(DEFAULT_FORCE_STOP);

    let checkpoint = cli.checkpoint.as_ref().map(|path| {
        FileCheckpoint::new(if path.is_absolute() {
            path.clone()
        } else {
            working_dir.join(path)
        })
    });

    let state = match (&checkpoint, cli.resume) {
        (Some(checkpoint), true) => {
            let state = checkpoint
                .load()
                .with_context(|| format!("Failed to resume from {}", checkpoint.path().display()))?;
            info!(run_id = %state.run_id, iteration = state.iteration, "Loaded checkpoint");
            state
        }
        _ => {
            let task = get_task(&cli, &config, &working_dir)?;
            let max_iterations = cli.max_iterations.unwrap_or(settings.max_iterations);
            WorkflowState::new(task, max_iterations).with_requirements(config.requirements.clone())
        }
    };

    let evaluator_configs = config.effective_evaluators();

    if cli.dry_run {
        println!("=== Dry Run ===");
        println!(
            "Task: {}",
            if state.task.chars().count() > 100 {
                format!("{}...", state.task.chars().take(100).collect::<String>())
            } else {
                state.task.clone()
            }
        );
        println!("Working dir: {}", working_dir.display());
        println!(
            "Producer: {} {}",
            config.producer.command,
            config.producer.args.join(" ")
        );
        for evaluator in &evaluator_configs {
            println!(
                "Evaluator: {} ({:?}, weight {})",
                evaluator.id, evaluator.kind, evaluator.weight
            );
        }
        println!("Max iterations: {}", state.max_iterations);
        println!("Pass threshold: {}", settings.pass_threshold);
        println!("Force-stop policy: {}", force_stop);
        println!("Escalation: {:?}", config.escalation.mode);
        if cli.resume {
            println!("Resuming at iteration {} ({})", state.iteration, state.status);
        }
        return Ok(());
    }

    // Producer
    let mut producer_config =
        CommandConfig::new(working_dir.clone()).with_env(config.producer.env.clone());
    if let Some(timeout) = settings.producer_timeout {
        producer_config = producer_config.with_timeout(timeout);
    }
    let producer_service: Arc<dyn GenerationService> = Arc::new(CommandService::new(
        PathBuf::from(&config.producer.command),
        config.producer.args.clone(),
        producer_config,
    ));
    let producer = GeneratingProducer::new(producer_service.clone());

    // Evaluators
    let mut evaluators = EvaluatorSet::new().with_fallback_score(settings.fallback_score);
    if let Some(timeout) = settings.evaluator_timeout {
        evaluators = evaluators.with_timeout(timeout);
    }
    for evaluator_config in &evaluator_configs {
        let evaluator: Arc<dyn Evaluator> = match evaluator_config.kind {
            EvaluatorKind::Critic => {
                let service: Arc<dyn GenerationService> = match &evaluator_config.command {
                    Some(command) => Arc::new(
                        CommandService::new(
                            PathBuf::from(command),
                            evaluator_config.args.clone(),
                            CommandConfig::new(working_dir.clone())
                                .with_env(evaluator_config.env.clone()),
                        )
                        .with_name(evaluator_config.id.clone()),
                    ),
                    None => producer_service.clone(),
                };
                let criteria = evaluator_config
                    .criteria
                    .clone()
                    .unwrap_or_else(|| "Overall correctness and quality.".to_string());
                let mut critic = CriticEvaluator::new(service, criteria);
                if let Some(pass_score) = evaluator_config.pass_score {
                    critic = critic.with_pass_score(pass_score);
                }
                Arc::new(critic)
            }
            EvaluatorKind::Sandbox => {
                let sandbox_config = config
                    .sandbox
                    .as_ref()
                    .context("sandbox evaluators need a [sandbox] section")?;
                let sandbox = Arc::new(ProcessSandbox::new(
                    PathBuf::from(&sandbox_config.command),
                    sandbox_config.args.clone(),
                    CommandConfig::new(working_dir.clone()).with_env(sandbox_config.env.clone()),
                ));
                let mut evaluator = SandboxEvaluator::new(sandbox, sandbox_config.timeout);
                if let Some(expected) = &evaluator_config.expected_stdout {
                    evaluator = evaluator.with_expected_stdout(expected.clone());
                }
                Arc::new(evaluator)
            }
        };
        evaluators
            .register(evaluator_config.id.clone(), evaluator_config.weight, evaluator)
            .with_context(|| format!("Invalid evaluator '{}'", evaluator_config.id))?;
    }

    // Decision policy and escalation gate
    let policy = DecisionPolicy::new(force_stop).with_escalation(EscalationPolicy {
        on_conflict: settings.escalate_on_conflict,
        human_review_threshold: settings.human_review_threshold,
        always: settings.require_human_review,
    });
    let gate: Option<Box<dyn EscalationChannel>> = match config.escalation.mode {
        EscalationMode::Interactive => Some(Box::new(TerminalReviewer)),
        EscalationMode::Threshold => Some(Box::new(ThresholdReviewer::new(config.approve_at()))),
        EscalationMode::None => None,
    };

    // Logging
    let logger = match &cli.log_file {
        Some(path) => Logger::with_file(log_format, path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?,
        None => Logger::new(log_format),
    };
    let session = match SessionWriter::new(&state.task) {
        Ok(writer) => Some(Arc::new(writer)),
        Err(e) => {
            warn!(error = %e, "Failed to create session file, continuing without it");
            None
        }
    };

    let mut runner = LoopRunner::new(
        &producer,
        &evaluators,
        Aggregator::new(settings.pass_threshold, settings.conflict_spread),
        policy,
        Arc::new(logger),
    )
    .with_config(RunnerConfig {
        producer_retries: settings.producer_retries,
        producer_timeout: settings.producer_timeout,
        escalation_timeout: settings.escalation_timeout,
        ..RunnerConfig::default()
    });
    if let Some(gate) = gate.as_deref() {
        runner = runner.with_escalation(gate);
    }
    if let Some(session) = &session {
        runner = runner.with_session(session.clone());
    }
    if let Some(checkpoint) = checkpoint {
        runner = runner.with_checkpoint(checkpoint);
    }

    // Handle Ctrl+C gracefully
    let cancel = runner.cancel_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Stopping at the next suspension point...");
        cancel.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let outcome = runner.run(state).await?;

    if cli.json_output {
        let json = serde_json::to_string_pretty(&outcome)?;
        println!("{}", json);
    } else {
        print_outcome(&outcome, settings.pass_threshold);
        if let Some(session) = &session {
            eprintln!("Session: {}", session.path().display().to_string().dimmed());
        }
    }

    // Flush buffered tracing output before exiting
    drop(guard);
    std::process::exit(outcome.exit_code());
}

fn get_task(cli: &Cli, config: &ProjectConfig, working_dir: &Path) -> Result<String> {
    // Prefer --task flag
    if let Some(ref task) = cli.task {
        return Ok(task.clone());
    }

    let task_path = if cli.task_file.is_absolute() {
        cli.task_file.clone()
    } else {
        working_dir.join(&cli.task_file)
    };

    if task_path.exists() {
        let content = std::fs::read_to_string(&task_path).context("Failed to read task file")?;
        return Ok(content.trim().to_string());
    }

    if let Some(ref task) = config.task {
        return Ok(task.clone());
    }

    anyhow::bail!(
        "No task provided. Use --task, create a {} file, or set `task` in {}",
        cli.task_file.display(),
        config::CONFIG_FILE_NAME
    )
}

fn print_outcome(outcome: &LoopOutcome, pass_threshold: f64) {
    match outcome {
        LoopOutcome::Approved {
            iterations,
            forced,
            weighted_score,
            artifact,
            total_duration_secs,
            ..
        } => {
            eprintln!();
            if *forced {
                eprintln!("{}", "=== APPROVED (FORCED) ===".bright_yellow().bold());
                eprintln!("Budget exhausted without a passing verdict.");
            } else {
                eprintln!("{}", "=== APPROVED ===".bright_green().bold());
            }
            eprintln!("Iterations: {}", iterations);
            if let Some(score) = weighted_score {
                eprintln!("Weighted score: {:.1}", score);
                if !*forced && *score < pass_threshold {
                    eprintln!(
                        "{}",
                        format!(
                            "Approved on review below the pass threshold of {:.1}",
                            pass_threshold
                        )
                        .yellow()
                    );
                }
            }
            eprintln!("Duration: {:.1}s", total_duration_secs);
            eprintln!();
            println!("{}", artifact);
        }
        LoopOutcome::Rejected {
            iterations,
            weighted_score,
            total_duration_secs,
            ..
        } => {
            eprintln!();
            eprintln!("{}", "=== REJECTED ===".bright_red().bold());
            eprintln!("Rejected after {} iteration(s)", iterations);
            if let Some(score) = weighted_score {
                eprintln!("Last weighted score: {:.1}", score);
            }
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::Cancelled {
            iterations,
            total_duration_secs,
            ..
        } => {
            eprintln!();
            eprintln!("=== CANCELLED ===");
            eprintln!("Stopped after {} iteration(s)", iterations);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
        LoopOutcome::Failed {
            iterations,
            error,
            total_duration_secs,
            ..
        } => {
            eprintln!();
            eprintln!("{}", "=== FAILED ===".red().bold());
            eprintln!("Error after {} iteration(s): {}", iterations, error);
            eprintln!("Duration: {:.1}s", total_duration_secs);
        }
    }
}
