use crate::{AggregateVerdict, EvaluationInput, MAX_SCORE};

/// Prompt templates for producers and critic evaluators
pub struct ReviewPrompts;

impl ReviewPrompts {
    /// Prompt for the first artifact, built from the task alone
    pub fn build_initial_prompt(task: &str, requirements: &[String]) -> String {
        format!(
            r#"Produce a complete solution for the following task.

## Task
{task}
{requirements}
Output ONLY the artifact itself, with no explanations before or after it."#,
            task = task,
            requirements = format_requirements(requirements),
        )
    }

    /// Prompt for a revision: the previous artifact plus the aggregated feedback
    pub fn build_revision_prompt(
        task: &str,
        requirements: &[String],
        artifact: &str,
        verdict: &AggregateVerdict,
    ) -> String {
        let suggestions = if verdict.suggestions.is_empty() {
            "(none)".to_string()
        } else {
            verdict
                .suggestions
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"Revise your previous attempt at this task based on reviewer feedback.

## Task
{task}
{requirements}
## Previous Attempt
```
{artifact}
```

## Review Score
{score:.1}/{max:.0}

## Reviewer Feedback
{feedback}

## Suggestions
{suggestions}

Address every feedback point while keeping what already works.
Output ONLY the revised artifact, with no explanations before or after it."#,
            task = task,
            requirements = format_requirements(requirements),
            artifact = truncate_output(artifact, 20000),
            score = verdict.weighted_score,
            max = MAX_SCORE,
            feedback = truncate_output(&verdict.feedback, 8000),
            suggestions = suggestions,
        )
    }

    /// Prompt asking a critic to score one artifact against its criteria
    pub fn build_evaluation_prompt(input: EvaluationInput<'_>, criteria: &str) -> String {
        format!(
            r#"You are an independent reviewer. Score the artifact below strictly against your criteria.

## Task
{task}
{requirements}
## Artifact (revision {iteration})
```
{artifact}
```

## Your Criteria
{criteria}

---

Give a short assessment, then end your response with an evaluation block.
The score is a number from 0 to {max:.0}; "suggestions" lists concrete, actionable fixes.

<evaluation>
{{"score": 7.5, "feedback": "Overall assessment", "suggestions": ["fix 1", "fix 2"]}}
</evaluation>"#,
            task = input.task,
            requirements = format_requirements(input.requirements),
            iteration = input.iteration,
            artifact = truncate_output(input.artifact, 20000),
            criteria = criteria,
            max = MAX_SCORE,
        )
    }
}

fn format_requirements(requirements: &[String]) -> String {
    if requirements.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = requirements
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r))
        .collect();
    format!("\n## Requirements\n{}\n", lines.join("\n"))
}

fn truncate_output(output: &str, max_len: usize) -> &str {
    if output.len() <= max_len {
        return output;
    }
    let mut cut = max_len;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    // Prefer a line boundary
    match output[..cut].rfind('\n') {
        Some(pos) => &output[..pos],
        None => &output[..cut],
    }
}
