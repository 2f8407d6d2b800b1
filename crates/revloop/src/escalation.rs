use async_trait::async_trait;
use colored::Colorize;
use dialoguer::{Input, Select};

use revloop_core::{EscalationChannel, EscalationError, ExternalDecision, WorkflowState};
use revloop_critic::AggregateVerdict;

/// Escalation gate that asks the person at the terminal
pub struct TerminalReviewer;

#[async_trait]
impl EscalationChannel for TerminalReviewer {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn escalate(
        &self,
        state: &WorkflowState,
        verdict: &AggregateVerdict,
    ) -> Result<ExternalDecision, EscalationError> {
        print_summary(state, verdict);

        // dialoguer blocks on stdin
        tokio::task::spawn_blocking(prompt)
            .await
            .map_err(|e| EscalationError::Unavailable(e.to_string()))?
    }
}

fn print_summary(state: &WorkflowState, verdict: &AggregateVerdict) {
    eprintln!();
    eprintln!(
        "{} iteration {}/{}",
        "REVIEW REQUESTED".bright_yellow().bold(),
        state.iteration,
        state.max_iterations
    );
    eprintln!("Task: {}", state.task);
    eprintln!(
        "Weighted score: {:.1} ({})",
        verdict.weighted_score,
        if verdict.passed { "passing".green() } else { "failing".red() }
    );
    for (id, score) in &verdict.scores {
        eprintln!("  {:<16} {:.1}", id, score);
    }
    for conflict in &verdict.conflicts {
        eprintln!("  {} {}", "conflict:".bright_red(), conflict.describe());
    }
    eprintln!();
    for line in state.artifact.lines().take(40) {
        eprintln!("  {}", line.dimmed());
    }
    eprintln!();
}

fn prompt() -> Result<ExternalDecision, EscalationError> {
    let unavailable = |e: dialoguer::Error| EscalationError::Unavailable(e.to_string());

    let choice = Select::new()
        .with_prompt("Approve this artifact?")
        .items(&["Approve", "Reject and revise"])
        .default(0)
        .interact()
        .map_err(unavailable)?;

    let note: String = Input::new()
        .with_prompt("Note for the producer (optional)")
        .allow_empty(true)
        .interact_text()
        .map_err(unavailable)?;

    Ok(if choice == 0 {
        ExternalDecision::approve(note)
    } else {
        ExternalDecision::reject(note)
    })
}
