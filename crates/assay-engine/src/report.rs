//! Report Composer

use crate::score::is_degraded;
use assay_core::{AssessmentReport, CriterionScore, OverallScore, TestOutcome, MAX_SCORE};

/// Everything the composer merges.
#[derive(Debug, Clone, Default)]
pub struct ReportInputs {
    pub user_scores: Vec<CriterionScore>,
    pub style_scores: Vec<CriterionScore>,
    pub tests: TestOutcome,
    /// Test cases removed by repair before the final run.
    pub pruned_tests: usize,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Merge scorer and runner outputs into the final report.
///
/// `overall.weighted_score` is the weighted mean of every criterion score,
/// blended with the test pass rate at `test_weight` when tests ran.
pub fn compose_report(inputs: ReportInputs, test_weight: f64) -> AssessmentReport {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for score in inputs.user_scores.iter().chain(inputs.style_scores.iter()) {
        if score.weight > 0.0 && score.weight.is_finite() {
            weighted_sum += score.score * score.weight;
            weight_total += score.weight;
        }
    }

    let mut notes = Vec::new();
    if let Some(rate) = inputs.tests.pass_rate() {
        if test_weight > 0.0 {
            weighted_sum += rate * MAX_SCORE * test_weight;
            weight_total += test_weight;
        }
        notes.push(format!(
            "{} of {} synthesized tests passed",
            inputs.tests.passed, inputs.tests.total
        ));
    }

    if inputs.tests.is_harness_error() {
        let message = inputs
            .tests
            .failed_tests
            .as_deref()
            .and_then(|t| t.first())
            .map(|t| t.message.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        notes.push(format!("test harness error: {}", message));
    }
    if inputs.pruned_tests > 0 {
        notes.push(format!(
            "{} failing synthesized test(s) pruned by repair",
            inputs.pruned_tests
        ));
    }

    let degraded = inputs
        .user_scores
        .iter()
        .chain(inputs.style_scores.iter())
        .filter(|s| is_degraded(s))
        .count();
    if degraded > 0 {
        notes.push(format!(
            "{} criteria scored without a model judgement (low confidence)",
            degraded
        ));
    }

    let overall = (weight_total > 0.0).then(|| OverallScore {
        weighted_score: round2(weighted_sum / weight_total),
        notes,
    });

    AssessmentReport {
        by_user_criteria: inputs.user_scores,
        by_style_criteria: inputs.style_scores,
        tests: inputs.tests,
        overall,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_core::Criterion;

    fn score(name: &str, value: f64, weight: f64) -> CriterionScore {
        CriterionScore::new(&Criterion::new(name, "", weight), value, "fine", vec![])
    }

    #[test]
    fn test_weighted_mean_without_tests() {
        let report = compose_report(
            ReportInputs {
                user_scores: vec![score("a", 80.0, 1.0), score("b", 40.0, 3.0)],
                ..ReportInputs::default()
            },
            10.0,
        );
        assert_eq!(report.overall.unwrap().weighted_score, 50.0);
    }

    #[test]
    fn test_pass_rate_is_blended() {
        let report = compose_report(
            ReportInputs {
                style_scores: vec![score("a", 60.0, 10.0)],
                tests: TestOutcome {
                    total: 4,
                    passed: 2,
                    failed: 2,
                    ..TestOutcome::default()
                },
                pruned_tests: 1,
                ..ReportInputs::default()
            },
            10.0,
        );
        let overall = report.overall.unwrap();
        assert_eq!(overall.weighted_score, 55.0);
        assert!(overall.notes.iter().any(|n| n.contains("2 of 4")));
        assert!(overall.notes.iter().any(|n| n.contains("pruned")));
    }

    #[test]
    fn test_nothing_to_score_omits_overall() {
        let report = compose_report(
            ReportInputs {
                tests: TestOutcome::harness_error("jest not found"),
                ..ReportInputs::default()
            },
            10.0,
        );
        assert!(report.overall.is_none());
        assert!(report.tests.is_harness_error());
    }

    #[test]
    fn test_degraded_scores_are_noted() {
        let degraded = CriterionScore::new(
            &Criterion::new("a", "", 5.0),
            50.0,
            crate::score::NO_MODEL_JUSTIFICATION,
            vec![],
        );
        let report = compose_report(
            ReportInputs {
                user_scores: vec![degraded],
                tests: TestOutcome::harness_error("boom\nstack"),
                ..ReportInputs::default()
            },
            10.0,
        );
        let notes = report.overall.unwrap().notes;
        assert!(notes.contains(&"test harness error: boom".to_string()));
        assert!(notes.iter().any(|n| n.contains("low confidence")));
    }
}
