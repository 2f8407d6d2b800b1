use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{Assessment, MAX_SCORE};

#[derive(Error, Debug)]
pub enum ScoreParseError {
    #[error("No evaluation payload found in evaluator output")]
    NoPayloadFound,

    #[error("Failed to parse evaluation JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Score is not a finite number: {0}")]
    InvalidScore(f64),

    #[error("Invalid evaluation format: {0}")]
    InvalidFormat(String),
}

/// Wire shape of an evaluation payload. Score field names vary between
/// critic prompts, so the common spellings are accepted.
#[derive(Debug, Deserialize)]
struct RawAssessment {
    #[serde(
        alias = "average_score",
        alias = "security_score",
        alias = "style_score",
        alias = "quality_score"
    )]
    score: f64,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    passed: Option<bool>,
}

impl Assessment {
    /// Parse an assessment from an evaluator's raw text output.
    ///
    /// Accepted payloads, in order of preference:
    /// ```text
    /// <evaluation>
    /// {"score": 7.5, "feedback": "...", "suggestions": ["..."]}
    /// </evaluation>
    /// ```
    /// a fenced ```json block, or the outermost `{...}` in the text.
    ///
    /// Scores are clamped to `0..=MAX_SCORE`. When the payload has no
    /// `passed` field it is derived from `pass_score`.
    pub fn parse(output: &str, pass_score: f64) -> Result<Self, ScoreParseError> {
        debug!(output_len = output.len(), "Parsing evaluator output");

        let payload = Self::find_payload(output)?;
        let raw: RawAssessment = serde_json::from_str(payload)?;

        if !raw.score.is_finite() {
            return Err(ScoreParseError::InvalidScore(raw.score));
        }
        let score = raw.score.clamp(0.0, MAX_SCORE);

        Ok(Assessment {
            score,
            passed: raw.passed.unwrap_or(score >= pass_score),
            feedback: raw.feedback.trim().to_string(),
            suggestions: raw
                .suggestions
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    fn find_payload(output: &str) -> Result<&str, ScoreParseError> {
        if let Some(block) = Self::tagged_block(output)? {
            debug!("Found evaluation block");
            return Ok(block);
        }

        if let Some(block) = Self::fenced_block(output) {
            debug!("Found fenced evaluation payload");
            return Ok(block);
        }

        match (output.find('{'), output.rfind('}')) {
            (Some(start), Some(end)) if start < end => Ok(&output[start..=end]),
            _ => Err(ScoreParseError::NoPayloadFound),
        }
    }

    fn tagged_block(output: &str) -> Result<Option<&str>, ScoreParseError> {
        const OPEN: &str = "<evaluation>";
        const CLOSE: &str = "</evaluation>";

        match (output.find(OPEN), output.find(CLOSE)) {
            (Some(start), Some(end)) if start < end => {
                Ok(Some(output[start + OPEN.len()..end].trim()))
            }
            (Some(_), Some(_)) => Err(ScoreParseError::InvalidFormat(
                "Malformed evaluation block".to_string(),
            )),
            _ => Ok(None),
        }
    }

    fn fenced_block(output: &str) -> Option<&str> {
        let start = output.find("```json").map(|p| p + "```json".len())?;
        let end = output[start..].find("```")?;
        Some(output[start..start + end].trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_block() {
        let output = r#"
The code is mostly fine.

<evaluation>
{"score": 8.5, "feedback": "Clear structure", "suggestions": ["Add docstrings", "  "]}
</evaluation>
"#;

        let assessment = Assessment::parse(output, 7.0).unwrap();
        assert!((assessment.score - 8.5).abs() < f64::EPSILON);
        assert!(assessment.passed);
        assert_eq!(assessment.feedback, "Clear structure");
        assert_eq!(assessment.suggestions, vec!["Add docstrings".to_string()]);
    }

    #[test]
    fn test_parse_fenced_json_with_alias() {
        let output = "Review:\n```json\n{\"security_score\": 4, \"feedback\": \"SQL injection\", \"risk_level\": \"high\"}\n```\n";

        let assessment = Assessment::parse(output, 7.0).unwrap();
        assert_eq!(assessment.score, 4.0);
        assert!(!assessment.passed);
        assert_eq!(assessment.feedback, "SQL injection");
    }

    #[test]
    fn test_parse_bare_object() {
        let output = r#"Result: {"average_score": 7.0, "feedback": "ok"} -- end"#;
        let assessment = Assessment::parse(output, 7.0).unwrap();
        assert!(assessment.passed);
    }

    #[test]
    fn test_explicit_passed_overrides_threshold() {
        let output = r#"<evaluation>{"score": 9, "passed": false}</evaluation>"#;
        let assessment = Assessment::parse(output, 7.0).unwrap();
        assert!(!assessment.passed);
    }

    #[test]
    fn test_score_is_clamped() {
        let output = r#"{"score": 42}"#;
        let assessment = Assessment::parse(output, 7.0).unwrap();
        assert_eq!(assessment.score, MAX_SCORE);
    }

    #[test]
    fn test_parse_no_payload() {
        let result = Assessment::parse("Looks great to me!", 7.0);
        assert!(matches!(result, Err(ScoreParseError::NoPayloadFound)));
    }

    #[test]
    fn test_parse_malformed_block() {
        let output = "</evaluation> {\"score\": 1} <evaluation>";
        let result = Assessment::parse(output, 7.0);
        assert!(matches!(result, Err(ScoreParseError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_missing_score() {
        let output = r#"<evaluation>{"feedback": "no number here"}</evaluation>"#;
        let result = Assessment::parse(output, 7.0);
        assert!(matches!(result, Err(ScoreParseError::JsonParseError(_))));
    }
}
