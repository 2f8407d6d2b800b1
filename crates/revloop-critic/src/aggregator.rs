use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::{EvaluationResult, DEFAULT_WEIGHT};

/// High-variance disagreement between evaluators in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub spread: f64,
    pub min_score: f64,
    pub max_score: f64,
    /// Evaluators holding the lowest score
    pub low: Vec<String>,
    /// Evaluators holding the highest score
    pub high: Vec<String>,
}

impl Conflict {
    pub fn describe(&self) -> String {
        format!(
            "score spread {:.1} ({} at {:.1} vs {} at {:.1})",
            self.spread,
            self.low.join(", "),
            self.min_score,
            self.high.join(", "),
            self.max_score
        )
    }
}

/// Combined verdict for one cycle. Derived from that cycle's evaluations only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateVerdict {
    pub weighted_score: f64,
    pub passed: bool,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
    /// Per-evaluator feedback, one `[id] text` line each
    pub feedback: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// Scores of the evaluators that reported, keyed by id
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl AggregateVerdict {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn short_description(&self) -> String {
        let mut text = format!(
            "{} ({:.1})",
            if self.passed { "PASS" } else { "FAIL" },
            self.weighted_score
        );
        if self.has_conflicts() {
            text.push_str(" [conflict]");
        }
        text
    }
}

/// Folds a cycle's evaluation results into one [`AggregateVerdict`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregator {
    pub pass_threshold: f64,
    pub conflict_spread: f64,
}

impl Aggregator {
    pub fn new(pass_threshold: f64, conflict_spread: f64) -> Self {
        Self {
            pass_threshold,
            conflict_spread,
        }
    }

    /// Weighted mean over the evaluators that reported this cycle.
    ///
    /// Abstentions are excluded from numerator and denominator alike.
    /// Fallback results count with their sentinel score, in the mean and in
    /// the conflict spread. Results are folded in evaluator-id order so the
    /// verdict does not depend on completion order.
    pub fn aggregate(
        &self,
        evaluations: &[EvaluationResult],
        weights: &HashMap<String, f64>,
    ) -> AggregateVerdict {
        let mut reported: Vec<&EvaluationResult> =
            evaluations.iter().filter(|e| !e.is_abstained()).collect();
        reported.sort_by(|a, b| a.evaluator_id.cmp(&b.evaluator_id));

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut feedback = Vec::with_capacity(reported.len());
        let mut suggestions: Vec<String> = Vec::new();
        let mut scores = BTreeMap::new();

        for result in &reported {
            let weight = weights
                .get(&result.evaluator_id)
                .copied()
                .unwrap_or(DEFAULT_WEIGHT);
            weighted_sum += result.score * weight;
            weight_total += weight;
            scores.insert(result.evaluator_id.clone(), result.score);

            if !result.feedback.is_empty() {
                feedback.push(format!("[{}] {}", result.evaluator_id, result.feedback));
            }
            for suggestion in &result.suggestions {
                if !suggestions.contains(suggestion) {
                    suggestions.push(suggestion.clone());
                }
            }
        }

        let weighted_score = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let conflicts = self.detect_conflict(&reported).into_iter().collect();

        let verdict = AggregateVerdict {
            weighted_score,
            passed: weighted_score >= self.pass_threshold,
            conflicts,
            feedback: feedback.join("\n"),
            suggestions,
            scores,
        };

        debug!(
            weighted_score = verdict.weighted_score,
            passed = verdict.passed,
            conflicts = verdict.conflicts.len(),
            "Aggregated evaluations"
        );

        verdict
    }

    fn detect_conflict(&self, reported: &[&EvaluationResult]) -> Option<Conflict> {
        let min_score = reported.iter().map(|r| r.score).reduce(f64::min)?;
        let max_score = reported.iter().map(|r| r.score).reduce(f64::max)?;
        let spread = max_score - min_score;

        if spread <= self.conflict_spread {
            return None;
        }

        let holding = |score: f64| -> Vec<String> {
            reported
                .iter()
                .filter(|r| r.score == score)
                .map(|r| r.evaluator_id.clone())
                .collect()
        };

        Some(Conflict {
            spread,
            min_score,
            max_score,
            low: holding(min_score),
            high: holding(max_score),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Assessment;

    fn scored(id: &str, score: f64) -> EvaluationResult {
        EvaluationResult::scored(
            id,
            Assessment::new(score, score >= 7.0, format!("{} says {}", id, score))
                .with_suggestions(vec![format!("improve {}", id)]),
        )
    }

    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(id, w)| (id.to_string(), *w)).collect()
    }

    #[test]
    fn test_weighted_mean() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![
            scored("quality", 8.0),
            scored("security", 6.0),
            scored("style", 7.0),
        ];
        let w = weights(&[("quality", 0.4), ("security", 0.35), ("style", 0.25)]);

        let verdict = aggregator.aggregate(&evaluations, &w);

        let expected = (8.0 * 0.4 + 6.0 * 0.35 + 7.0 * 0.25) / 1.0;
        assert!((verdict.weighted_score - expected).abs() < 1e-9);
        assert!(verdict.passed);
        assert!(verdict.conflicts.is_empty());
        assert_eq!(verdict.scores.len(), 3);
    }

    #[test]
    fn test_abstentions_are_excluded_from_denominator() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![scored("a", 8.0), EvaluationResult::abstained("b")];
        let w = weights(&[("a", 1.0), ("b", 3.0)]);

        let verdict = aggregator.aggregate(&evaluations, &w);

        assert_eq!(verdict.weighted_score, 8.0);
        assert!(verdict.passed);
        assert!(!verdict.scores.contains_key("b"));
    }

    #[test]
    fn test_order_independent() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let w = weights(&[("a", 0.1), ("b", 0.7), ("c", 0.2)]);
        let forward = vec![scored("a", 3.3), scored("b", 7.1), scored("c", 9.9)];
        let mut reversed = forward.clone();
        reversed.reverse();

        assert_eq!(
            aggregator.aggregate(&forward, &w),
            aggregator.aggregate(&reversed, &w)
        );
    }

    #[test]
    fn test_threshold_equality_passes() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let verdict = aggregator.aggregate(&[scored("a", 7.0)], &HashMap::new());
        assert!(verdict.passed);
    }

    #[test]
    fn test_uniform_passing_scores_have_no_conflict() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![scored("a", 8.0), scored("b", 8.0), scored("c", 8.0)];
        let verdict = aggregator.aggregate(&evaluations, &HashMap::new());
        assert!(verdict.passed);
        assert!(!verdict.has_conflicts());
    }

    #[test]
    fn test_conflict_names_disagreeing_evaluators() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![scored("a", 9.0), scored("b", 2.0), scored("c", 5.0)];
        let verdict = aggregator.aggregate(&evaluations, &HashMap::new());

        assert_eq!(verdict.conflicts.len(), 1);
        let conflict = &verdict.conflicts[0];
        assert_eq!(conflict.spread, 7.0);
        assert_eq!(conflict.low, vec!["b".to_string()]);
        assert_eq!(conflict.high, vec!["a".to_string()]);
    }

    #[test]
    fn test_spread_equal_to_limit_is_not_conflict() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![scored("a", 8.0), scored("b", 5.0)];
        let verdict = aggregator.aggregate(&evaluations, &HashMap::new());
        assert!(!verdict.has_conflicts());
    }

    #[test]
    fn test_fallback_counts_in_mean_and_conflicts() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![
            scored("a", 9.0),
            EvaluationResult::fallback("b", 1.0, "unparseable"),
        ];
        let verdict = aggregator.aggregate(&evaluations, &HashMap::new());

        assert_eq!(verdict.weighted_score, 5.0);
        assert!(!verdict.passed);
        assert_eq!(verdict.conflicts.len(), 1);
        assert_eq!(verdict.conflicts[0].low, vec!["b".to_string()]);
        assert_eq!(verdict.conflicts[0].high, vec!["a".to_string()]);
        assert!(verdict.feedback.contains("[b] [fallback]"));
    }

    #[test]
    fn test_fallback_at_passing_mean_still_conflicts() {
        // A crashed evaluator's sentinel must not quietly lift a split panel
        let aggregator = Aggregator::new(7.0, 3.0);
        let evaluations = vec![
            scored("quality", 9.0),
            EvaluationResult::fallback("security", 5.0, "evaluator crashed"),
        ];
        let verdict = aggregator.aggregate(&evaluations, &HashMap::new());

        assert_eq!(verdict.weighted_score, 7.0);
        assert!(verdict.passed);
        assert!(verdict.has_conflicts());
        assert_eq!(verdict.conflicts[0].spread, 4.0);
    }

    #[test]
    fn test_all_abstained_scores_zero() {
        let aggregator = Aggregator::new(7.0, 3.0);
        let verdict = aggregator.aggregate(
            &[EvaluationResult::abstained("a")],
            &HashMap::new(),
        );
        assert_eq!(verdict.weighted_score, 0.0);
        assert!(!verdict.passed);
        assert!(verdict.feedback.is_empty());
    }
}
