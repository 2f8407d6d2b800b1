use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Structured log events for the review loop.
///
/// `iteration` is always the 1-based number of the produce/evaluate cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    LoopStarted {
        run_id: String,
        task: String,
        evaluators: Vec<String>,
        max_iterations: usize,
    },
    ProducerStarted {
        iteration: usize,
        revision: bool,
    },
    ProducerRetry {
        iteration: usize,
        attempt: u32,
        error: String,
    },
    ProducerCompleted {
        iteration: usize,
        artifact_len: usize,
        duration_secs: f64,
    },
    EvaluatorCompleted {
        iteration: usize,
        evaluator: String,
        score: f64,
        passed: bool,
        /// "scored", "fallback" or "abstained"
        kind: String,
    },
    VerdictReached {
        iteration: usize,
        weighted_score: f64,
        passed: bool,
        conflicts: Vec<String>,
    },
    StatusChanged {
        iteration: usize,
        from: String,
        to: String,
    },
    EscalationStarted {
        iteration: usize,
        reason: String,
    },
    EscalationResolved {
        iteration: usize,
        approved: bool,
        note: String,
    },
    MaxIterationsReached {
        iterations: usize,
        policy: String,
    },
    LoopCompleted {
        iterations: usize,
        status: String,
        weighted_score: Option<f64>,
        duration_secs: f64,
    },
    LoopCancelled {
        iterations: usize,
    },
    ErrorEncountered {
        iteration: usize,
        error: String,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors and visual structure
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Console renderer for loop events, with an optional JSON file sink
pub struct Logger {
    format: LogFormat,
    quiet: bool,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            quiet: false,
            file_writer: None,
        }
    }

    /// Logger that writes nothing to the console (file sink still applies)
    pub fn quiet() -> Self {
        Self {
            format: LogFormat::Compact,
            quiet: true,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            quiet: false,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let _ = writeln!(file, "{}", event.with_timestamp());
            }
        }

        if self.quiet {
            return;
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::LoopStarted {
                task,
                evaluators,
                max_iterations,
                ..
            } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╭─────────────────────────────────────────────────────────────────────╮"
                        .bright_blue()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {}{}",
                    "│".bright_blue(),
                    "revloop".bold().bright_white(),
                    " ".repeat(60) + &"│".bright_blue().to_string()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Task:".dimmed(),
                    Self::truncate_with_padding(task, 60, 66).dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}  {} {}",
                    "│".bright_blue(),
                    "Critics:".dimmed(),
                    Self::truncate_with_padding(
                        &format!("{} (max {} iterations)", evaluators.join(", "), max_iterations),
                        57,
                        63
                    )
                    .dimmed()
                );
                let _ = writeln!(
                    stderr,
                    "{}",
                    "╰─────────────────────────────────────────────────────────────────────╯"
                        .bright_blue()
                );
                let _ = writeln!(stderr);
            }
            LogEvent::ProducerStarted {
                iteration,
                revision,
            } => {
                let iter_text = format!("─ Iteration {} ", iteration);
                let padding = "─".repeat(67usize.saturating_sub(iter_text.chars().count()));
                let _ = writeln!(
                    stderr,
                    "{}{}{}",
                    "┌".bright_blue(),
                    iter_text.bright_blue().bold(),
                    padding.bright_blue()
                );
                let _ = writeln!(stderr);
                let label = if *revision { "REVISE" } else { "PRODUCE" };
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_cyan(),
                    label.bright_cyan().bold()
                );
            }
            LogEvent::ProducerRetry { attempt, error, .. } => {
                let _ = writeln!(
                    stderr,
                    "    {} Attempt {} failed: {}",
                    "↻".bright_yellow(),
                    attempt,
                    error.dimmed()
                );
            }
            LogEvent::ProducerCompleted {
                artifact_len,
                duration_secs,
                ..
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} chars ({:.1}s)",
                    "✓".bright_green(),
                    artifact_len,
                    duration_secs
                );
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "  {} {}",
                    "▶".bright_magenta(),
                    "REVIEW".bright_magenta().bold()
                );
            }
            LogEvent::EvaluatorCompleted {
                evaluator,
                score,
                passed,
                kind,
                ..
            } => {
                let mark = match kind.as_str() {
                    "fallback" => "?".bright_yellow(),
                    "abstained" => "-".dimmed(),
                    _ if *passed => "✓".bright_green(),
                    _ => "✗".bright_red(),
                };
                let detail = if kind == "abstained" {
                    "abstained".to_string()
                } else if kind == "fallback" {
                    format!("{:.1}/10 (fallback)", score)
                } else {
                    format!("{:.1}/10", score)
                };
                let _ = writeln!(stderr, "    {} {:<16} {}", mark, evaluator, detail);
            }
            LogEvent::VerdictReached {
                weighted_score,
                passed,
                conflicts,
                ..
            } => {
                let text = format!("Weighted score: {:.1}/10", weighted_score);
                let styled = if *passed {
                    format!("✓ {}", text).bright_green().to_string()
                } else {
                    format!("→ {}", text).bright_yellow().to_string()
                };
                let _ = writeln!(stderr);
                let _ = writeln!(stderr, "    {}", styled);
                for conflict in conflicts {
                    let _ = writeln!(stderr, "    {} Conflict: {}", "⚠".bright_yellow(), conflict);
                }
            }
            LogEvent::StatusChanged { to, .. } => {
                let styled = match to.as_str() {
                    "approved" => to.to_uppercase().bright_green().bold(),
                    "rejected" => to.to_uppercase().bright_red().bold(),
                    "escalated" => to.to_uppercase().bright_yellow().bold(),
                    _ => to.to_uppercase().normal(),
                };
                let _ = writeln!(stderr, "    Status: {}", styled);
                if to != "in_review" && to != "escalated" {
                    let _ = writeln!(stderr);
                    let _ = writeln!(
                        stderr,
                        "{}",
                        "└─────────────────────────────────────────────────────────────────────┘"
                            .bright_blue()
                    );
                    let _ = writeln!(stderr);
                }
            }
            LogEvent::EscalationStarted { reason, .. } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {}",
                    "▶".bright_yellow(),
                    "ESCALATION".bright_yellow().bold(),
                    reason.dimmed()
                );
            }
            LogEvent::EscalationResolved { approved, note, .. } => {
                let decision = if *approved {
                    "✓ Reviewer approved".bright_green()
                } else {
                    "✗ Reviewer rejected".bright_red()
                };
                if note.is_empty() {
                    let _ = writeln!(stderr, "    {}", decision);
                } else {
                    let _ = writeln!(stderr, "    {}: {}", decision, note);
                }
            }
            LogEvent::MaxIterationsReached { iterations, policy } => {
                let _ = writeln!(
                    stderr,
                    "{} Maximum iterations reached ({}), force-stop policy: {}",
                    "⚠".bright_yellow(),
                    iterations,
                    policy
                );
            }
            LogEvent::LoopCompleted { .. } => {
                // The binary prints the final outcome itself
            }
            LogEvent::LoopCancelled { iterations } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} Cancelled after {} iteration(s)",
                    "✗".bright_red(),
                    iterations
                );
            }
            LogEvent::ErrorEncountered { iteration, error } => {
                let _ = writeln!(stderr);
                let _ = writeln!(
                    stderr,
                    "{} Error in iteration {}: {}",
                    "✗".bright_red(),
                    iteration,
                    error.bright_red()
                );
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::LoopStarted { evaluators, .. } => {
                format!("[{}] loop:start critics={}", timestamp, evaluators.join(","))
            }
            LogEvent::ProducerStarted { iteration, .. } => {
                format!("[{}] produce:start:{}", timestamp, iteration)
            }
            LogEvent::ProducerRetry {
                iteration,
                attempt,
                error,
            } => format!(
                "[{}] produce:retry:{} attempt={} {}",
                timestamp, iteration, attempt, error
            ),
            LogEvent::ProducerCompleted {
                iteration,
                artifact_len,
                duration_secs,
            } => format!(
                "[{}] produce:done:{} {}c {:.1}s",
                timestamp, iteration, artifact_len, duration_secs
            ),
            LogEvent::EvaluatorCompleted {
                iteration,
                evaluator,
                score,
                kind,
                ..
            } => format!(
                "[{}] eval:{}:{} {:.1} {}",
                timestamp, iteration, evaluator, score, kind
            ),
            LogEvent::VerdictReached {
                iteration,
                weighted_score,
                passed,
                conflicts,
            } => format!(
                "[{}] verdict:{} {:.1} {}{}",
                timestamp,
                iteration,
                weighted_score,
                if *passed { "pass" } else { "fail" },
                if conflicts.is_empty() { "" } else { " conflict" }
            ),
            LogEvent::StatusChanged {
                iteration,
                from,
                to,
            } => format!("[{}] status:{} {}->{}", timestamp, iteration, from, to),
            LogEvent::EscalationStarted { iteration, reason } => {
                format!("[{}] escalate:{} {}", timestamp, iteration, reason)
            }
            LogEvent::EscalationResolved {
                iteration,
                approved,
                ..
            } => format!(
                "[{}] escalate:done:{} {}",
                timestamp,
                iteration,
                if *approved { "approve" } else { "reject" }
            ),
            LogEvent::MaxIterationsReached { iterations, policy } => {
                format!("[{}] loop:limit:{} {}", timestamp, iterations, policy)
            }
            LogEvent::LoopCompleted {
                iterations,
                status,
                duration_secs,
                ..
            } => format!(
                "[{}] loop:done:{} {} {:.1}s",
                timestamp, iterations, status, duration_secs
            ),
            LogEvent::LoopCancelled { iterations } => {
                format!("[{}] loop:cancelled:{}", timestamp, iterations)
            }
            LogEvent::ErrorEncountered { iteration, error } => {
                format!("[{}] error:{}:{}", timestamp, iteration, error)
            }
        };
        let _ = writeln!(stderr, "{}", msg);
    }

    /// Truncate a string and pad to exact width
    fn truncate_with_padding(s: &str, max_len: usize, total_width: usize) -> String {
        let truncated = if s.chars().count() > max_len {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", head)
        } else {
            s.to_string()
        };

        let padding_needed = total_width.saturating_sub(truncated.chars().count() + 1);
        format!("{}{}│", truncated, " ".repeat(padding_needed))
    }
}
