//! Criteria Scorer
//!
//! One `CriterionScore` per requested criterion, always. Model trouble of
//! any kind degrades to labeled fixed scores instead of an error.

use crate::llm::{parse_reply, prompts, ModelReply};
use assay_core::util::char_prefix;
use assay_core::{AssessmentContext, Criterion, CriterionScore, Generate, StyleSheet};
use serde_json::Value;
use tracing::{info, warn};

pub const NO_MODEL_SCORE: f64 = 50.0;
pub const NO_MODEL_JUSTIFICATION: &str = "no model client provided";
pub const MODEL_ERROR_SCORE: f64 = 50.0;
pub const UNPARSABLE_SCORE: f64 = 75.0;
pub const MISSING_RESULT_SCORE: f64 = 50.0;
const RAW_EXCERPT_CHARS: usize = 200;

const MODEL_ERROR_PREFIX: &str = "error evaluating criteria: ";
const UNPARSABLE_PREFIX: &str = "model response could not be parsed: ";
const MISSING_RESULT_JUSTIFICATION: &str = "model reply had no result for this criterion";

/// Whether a score came from a fallback path rather than a model judgement.
pub fn is_degraded(score: &CriterionScore) -> bool {
    score.justification == NO_MODEL_JUSTIFICATION
        || score.justification == MISSING_RESULT_JUSTIFICATION
        || score.justification.starts_with(MODEL_ERROR_PREFIX)
        || score.justification.starts_with(UNPARSABLE_PREFIX)
}

/// Which prompt to build around the criteria.
#[derive(Debug, Clone, Copy)]
pub enum Rubric<'a> {
    User,
    Style(&'a StyleSheet),
}

fn uniform(criteria: &[Criterion], score: f64, justification: &str, suggestion: &str) -> Vec<CriterionScore> {
    criteria
        .iter()
        .map(|c| CriterionScore::new(c, score, justification, vec![suggestion.to_string()]))
        .collect()
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn suggestions(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn result_name(item: &Value) -> Option<&str> {
    item.get("name").and_then(Value::as_str)
}

/// Pick the reply entry for `criteria[index]`: an exact name match, else
/// the entry at the same position unless another criterion claims it.
fn match_result<'v>(criteria: &[Criterion], index: usize, items: &'v [Value]) -> Option<&'v Value> {
    let name = criteria[index].name.as_str();
    if let Some(hit) = items.iter().find(|item| result_name(item) == Some(name)) {
        return Some(hit);
    }
    let positional = items.get(index)?;
    let claimed = result_name(positional)
        .is_some_and(|n| n != name && criteria.iter().any(|c| c.name == n));
    if claimed {
        None
    } else {
        Some(positional)
    }
}

/// Map a parsed reply back onto the requested criteria.
pub fn scores_from_items(criteria: &[Criterion], items: &[Value]) -> Vec<CriterionScore> {
    criteria
        .iter()
        .enumerate()
        .map(|(index, criterion)| match match_result(criteria, index, items) {
            Some(item) => {
                let justification = item
                    .get("justification")
                    .and_then(Value::as_str)
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or("No justification provided");
                CriterionScore::new(
                    criterion,
                    number(item.get("score")).unwrap_or(MISSING_RESULT_SCORE),
                    justification,
                    suggestions(item.get("suggestions")),
                )
            }
            None => CriterionScore::new(
                criterion,
                MISSING_RESULT_SCORE,
                MISSING_RESULT_JUSTIFICATION,
                vec!["Manual review required".to_string()],
            ),
        })
        .collect()
}

/// Score `criteria` against `ctx`.
pub async fn score_criteria(
    ctx: &AssessmentContext,
    criteria: &[Criterion],
    rubric: Rubric<'_>,
    generator: Option<&dyn Generate>,
) -> Vec<CriterionScore> {
    if criteria.is_empty() {
        return Vec::new();
    }

    let Some(model) = generator else {
        return uniform(criteria, NO_MODEL_SCORE, NO_MODEL_JUSTIFICATION, "Manual review required");
    };

    let prompt = match rubric {
        Rubric::User => prompts::criteria_prompt(ctx, criteria),
        Rubric::Style(sheet) => prompts::style_criteria_prompt(ctx, criteria, sheet),
    };

    let raw = match model.generate(&prompt).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(error = %err, criteria = criteria.len(), "criteria scoring failed");
            return uniform(
                criteria,
                MODEL_ERROR_SCORE,
                &format!("{}{}", MODEL_ERROR_PREFIX, err),
                "Manual review required due to evaluation error",
            );
        }
    };

    let scores = match parse_reply(&raw) {
        ModelReply::Parsed(items) => scores_from_items(criteria, &items),
        ModelReply::Unparsable(raw) => {
            warn!("model reply for criteria was not a JSON array");
            uniform(
                criteria,
                UNPARSABLE_SCORE,
                &format!("{}{}...", UNPARSABLE_PREFIX, char_prefix(&raw, RAW_EXCERPT_CHARS)),
                "Manual review required for this criterion",
            )
        }
    };
    info!(criteria = scores.len(), "scored criteria");
    scores
}
