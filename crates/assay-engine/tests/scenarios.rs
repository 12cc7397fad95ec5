//! End-to-end behavior of the assessment stages against on-disk fixtures.

use assay_core::context::ContextBuilder;
use assay_core::{
    AssessmentContext, Criterion, DiffEntry, DiffStatus, FailedTest, Generate, SourceFile,
    TestOutcome,
};
use assay_engine::score::{is_degraded, MISSING_RESULT_SCORE, NO_MODEL_JUSTIFICATION};
use assay_engine::{remove_failing_tests, score_criteria, Rubric};
use std::fs;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tempfile::tempdir;

struct Canned(String);

impl Generate for Canned {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn import_edge_and_framework_are_captured() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    write(root, "src/api.js", "import { db } from './db';\nexport function list() { return db.all(); }");
    write(root, "src/db.js", "export const db = { all() { return []; } };");
    write(root, "package.json", r#"{"dependencies":{"react":"^18"}}"#);

    let diff = vec![
        DiffEntry::new("src/api.js", DiffStatus::Modified),
        DiffEntry::new("src/db.js", DiffStatus::Modified),
    ];
    let ctx = ContextBuilder::default().build(&diff, root, None).unwrap();

    let paths: Vec<&str> = ctx.related_files.iter().map(|f| f.path.as_str()).collect();
    assert!(paths.contains(&"src/api.js"));
    assert!(paths.contains(&"src/db.js"));
    assert!(ctx.tech_profile.frameworks.contains("react"));
}

#[tokio::test]
async fn two_criteria_without_model_score_fifty() {
    let criteria = vec![
        Criterion::new("Correctness", "Does what it says", 7.0),
        Criterion::new("Clarity", "Easy to follow", 3.0),
    ];
    let scores = score_criteria(&AssessmentContext::default(), &criteria, Rubric::User, None).await;
    assert_eq!(scores.len(), 2);
    assert!(scores.iter().all(|s| s.score == 50.0));
    assert!(scores.iter().all(|s| s.justification == NO_MODEL_JUSTIFICATION));
}

#[cfg(unix)]
#[tokio::test]
async fn failing_test_is_counted_and_named() {
    use assay_engine::{HarnessCommand, SandboxRunner};
    use std::time::Duration;

    let dir = tempdir().unwrap();
    let report = r#"{"numTotalTests":2,"numPassedTests":1,"numFailedTests":1,"testResults":[{"name":"/box/b.test.js","status":"failed","assertionResults":[{"fullName":"b fails","title":"fails","status":"failed","failureMessages":["expected 1 to be 2"]}]},{"name":"/box/a.test.js","status":"passed","assertionResults":[{"fullName":"a passes","title":"passes","status":"passed","failureMessages":[]}]}]}"#;
    let script = format!(
        r#"for a in "$@"; do case "$a" in --outputFile=*) out="${{a#--outputFile=}}";; esac; done; printf '%s' '{}' > "$out"; exit 1"#,
        report
    );
    let runner = SandboxRunner::new(HarnessCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script, "harness".to_string()],
        timeout: Duration::from_secs(30),
    });
    let tests = vec![
        SourceFile::new("a.test.js", "test('passes', () => expect(1).toBe(1));"),
        SourceFile::new("b.test.js", "describe('b', () => { it('fails', () => expect(1).toBe(2)); });"),
    ];

    let outcome = runner.run(&tests, dir.path(), &dir.path().join("box")).await.unwrap();
    assert_eq!(outcome.total, 2);
    assert!(outcome.failed >= 1);
    assert_eq!(outcome.failed_tests.as_ref().map(Vec::len), Some(outcome.failed));
    assert_eq!(outcome.failed_names(), vec!["b fails"]);
}

#[test]
fn repair_removes_only_the_failing_case() {
    let dir = tempdir().unwrap();
    let source = "describe('cart', () => {\n  it('adds items', () => {\n    expect(1).toBe(1);\n  });\n  it('removes items', () => {\n    expect(1).toBe(2);\n  });\n});\n";
    let tests = vec![SourceFile::new("cart.test.ts", source)];
    let outcome = TestOutcome {
        total: 2,
        passed: 1,
        failed: 1,
        duration_ms: None,
        failed_tests: Some(vec![FailedTest {
            name: "cart removes items".to_string(),
            message: "expected 1 to be 2".to_string(),
        }]),
    };

    let repaired = remove_failing_tests(&tests, &outcome, dir.path());
    assert_eq!(
        repaired[0].content,
        "describe('cart', () => {\n  it('adds items', () => {\n    expect(1).toBe(1);\n  });\n});\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("cart.test.ts")).unwrap(),
        repaired[0].content
    );
}

#[tokio::test]
async fn fenced_partial_reply_defaults_unmatched_criteria() {
    let criteria = vec![
        Criterion::new("Security", "No injection", 9.0),
        Criterion::new("Performance", "No hot loops", 4.0),
        Criterion::new("Docs", "Public items documented", 2.0),
    ];
    let reply = "Here you go:\n```json\n[{\"name\": \"Performance\", \"score\": 82, \"justification\": \"tight loops\"}]\n```";
    let model = Canned(reply.to_string());

    let scores =
        score_criteria(&AssessmentContext::default(), &criteria, Rubric::User, Some(&model)).await;
    assert_eq!(scores.len(), 3);
    assert_eq!(scores[1].score, 82.0);
    assert!(!is_degraded(&scores[1]));
    for index in [0, 2] {
        assert_eq!(scores[index].score, MISSING_RESULT_SCORE);
        assert!(is_degraded(&scores[index]));
    }
}

#[cfg(unix)]
#[tokio::test]
async fn pipeline_repairs_once_and_composes_report() {
    use assay_adapters::{RubricStorage, RubricStore};
    use assay_engine::{AssessmentRequest, Assessor, HarnessCommand, SandboxRunner};
    use std::sync::Arc;
    use std::time::Duration;

    let repo = tempdir().unwrap();
    let state = tempdir().unwrap();
    write(repo.path(), "src/math.js", "export function add(a, b) {\n  return a + b;\n}\n");
    write(repo.path(), "package.json", r#"{"devDependencies":{"jest":"^29"}}"#);

    // First run fails the placeholder test, the re-run passes.
    let marker = state.path().join("ran-once");
    let failing = r#"{"numTotalTests":1,"numPassedTests":0,"numFailedTests":1,"testResults":[{"name":"math.test.js","status":"failed","assertionResults":[{"fullName":"src/math.js should work","title":"should work","status":"failed","failureMessages":["nope"]}]}]}"#;
    let passing = r#"{"numTotalTests":0,"numPassedTests":0,"numFailedTests":0,"testResults":[]}"#;
    let script = format!(
        r#"for a in "$@"; do case "$a" in --outputFile=*) out="${{a#--outputFile=}}";; esac; done; if [ -f '{marker}' ]; then printf '%s' '{passing}' > "$out"; else touch '{marker}'; printf '%s' '{failing}' > "$out"; fi"#,
        marker = marker.display(),
        passing = passing,
        failing = failing,
    );
    let runner = SandboxRunner::new(HarnessCommand {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script, "harness".to_string()],
        timeout: Duration::from_secs(30),
    });
    let store = Arc::new(RubricStore::new(state.path().join("store")));
    let assessor = Assessor::new(ContextBuilder::default(), runner).with_storage(store.clone());

    let request = AssessmentRequest {
        repo_root: repo.path().to_path_buf(),
        diff: vec![DiffEntry::new("src/math.js", DiffStatus::Added)],
        criteria: vec![Criterion::new("Correctness", "Works", 5.0)],
        style_sheet: None,
        repo: "acme/math".to_string(),
        candidate: "pr-7".to_string(),
    };
    let assessment = assessor.assess(&request).await.unwrap();

    assert_eq!(assessment.synthesis.proposed_tests[0].path, "math.test.js");
    assert!(assessment
        .synthesis
        .proposed_tests[0]
        .content
        .contains("from '../../src/math'"));

    let report = &assessment.report;
    assert_eq!(report.by_user_criteria.len(), 1);
    assert!(report.by_style_criteria.is_empty());
    assert_eq!(report.tests.failed, 0);
    let overall = report.overall.as_ref().unwrap();
    assert_eq!(overall.weighted_score, 50.0);
    assert!(overall.notes.iter().any(|n| n.contains("pruned")));

    let stored = store.load_report("acme/math", "pr-7").unwrap().unwrap();
    assert_eq!(stored.report, *report);
    assert!(store.load_style_sheet("acme/math").unwrap().is_none());
}
