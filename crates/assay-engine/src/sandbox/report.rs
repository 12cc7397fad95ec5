//! Jest `--json` aggregate result to `TestOutcome`.

use assay_core::{FailedTest, TestOutcome};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AggregatedResult {
    num_total_tests: usize,
    num_passed_tests: usize,
    num_failed_tests: usize,
    start_time: Option<u64>,
    test_results: Vec<SuiteResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SuiteResult {
    name: String,
    status: String,
    message: String,
    start_time: Option<u64>,
    end_time: Option<u64>,
    #[serde(alias = "testResults")]
    assertion_results: Vec<AssertionResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AssertionResult {
    full_name: String,
    title: String,
    status: String,
    failure_messages: Vec<String>,
}

fn display_suite_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Map the harness's JSON report to a `TestOutcome`.
///
/// A suite that failed before producing any assertion (syntax error,
/// missing import) counts as one failed test so `failed_tests` always
/// has exactly `failed` entries.
pub fn parse_jest_report(json: &str) -> anyhow::Result<TestOutcome> {
    let report: AggregatedResult = serde_json::from_str(json)?;

    let mut failed_tests = Vec::new();
    let mut broken_suites = 0usize;
    let mut latest_end: Option<u64> = None;

    for suite in &report.test_results {
        latest_end = latest_end.max(suite.end_time);
        for assertion in &suite.assertion_results {
            if assertion.status == "failed" {
                let name = if assertion.full_name.is_empty() {
                    assertion.title.clone()
                } else {
                    assertion.full_name.clone()
                };
                failed_tests.push(FailedTest {
                    name,
                    message: assertion.failure_messages.join("\n"),
                });
            }
        }
        if suite.status == "failed" && suite.assertion_results.is_empty() {
            broken_suites += 1;
            failed_tests.push(FailedTest {
                name: format!("{} (suite failed to run)", display_suite_name(&suite.name)),
                message: suite.message.clone(),
            });
        }
    }

    let assertion_failures = failed_tests.len() - broken_suites;
    let failed = report.num_failed_tests.max(assertion_failures) + broken_suites;
    let total = report.num_total_tests.max(report.num_passed_tests + failed);
    let start = report
        .start_time
        .or_else(|| report.test_results.iter().filter_map(|s| s.start_time).min());
    let duration_ms = match (start, latest_end) {
        (Some(s), Some(e)) if e >= s => Some(e - s),
        _ => None,
    };

    // Harness counts and listed failures can disagree when names are missing.
    failed_tests.truncate(failed);
    while failed_tests.len() < failed {
        failed_tests.push(FailedTest {
            name: format!("unnamed failure {}", failed_tests.len() + 1),
            message: String::new(),
        });
    }

    Ok(TestOutcome {
        total,
        passed: report.num_passed_tests,
        failed,
        duration_ms,
        failed_tests: if failed_tests.is_empty() {
            None
        } else {
            Some(failed_tests)
        },
    })
}
