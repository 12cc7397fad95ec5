//! Data model shared by every pipeline stage.
//!
//! Field names serialize in camelCase because the report is consumed as-is by
//! the HTTP layer and stored alongside candidate records.

use crate::error::{AssayError, AssayResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};

// ═══════════════════════════════════════════════════════════════════════════
//  DIFF + FILES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Removed,
    Modified,
    Renamed,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::Added => "added",
            DiffStatus::Removed => "removed",
            DiffStatus::Modified => "modified",
            DiffStatus::Renamed => "renamed",
        }
    }
}

/// One file touched by the change under review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
}

impl DiffEntry {
    pub fn new(path: impl Into<String>, status: DiffStatus) -> Self {
        Self {
            path: path.into(),
            status,
            additions: 0,
            deletions: 0,
            patch: None,
            previous_path: None,
        }
    }

    /// Reject entries whose path cannot name a file inside the repository.
    pub fn validate(&self) -> AssayResult<()> {
        if self.path.trim().is_empty() {
            return Err(AssayError::invalid_diff(&self.path, "path is empty"));
        }
        let path = Path::new(&self.path);
        if path.is_absolute() || self.path.starts_with('/') {
            return Err(AssayError::invalid_diff(&self.path, "path is absolute"));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(AssayError::invalid_diff(
                &self.path,
                "path escapes the repository",
            ));
        }
        Ok(())
    }

    pub fn is_removed(&self) -> bool {
        self.status == DiffStatus::Removed
    }
}

/// Parse and validate a diff payload (a JSON array of entries).
pub fn parse_diff_entries(json: &str) -> AssayResult<Vec<DiffEntry>> {
    let entries: Vec<DiffEntry> = serde_json::from_str(json)
        .map_err(|e| AssayError::invalid_diff("<payload>", e.to_string()))?;
    for entry in &entries {
        entry.validate()?;
    }
    Ok(entries)
}

/// A file's full text, addressed by a repo-relative forward-slash path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub path: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl AsRef<str>, content: impl Into<String>) -> Self {
        Self {
            path: normalize_slashes(path.as_ref()),
            content: content.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Extension without the leading dot, lowercased.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// Same path, new content. Files are never edited in place.
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            content: content.into(),
            language: self.language.clone(),
        }
    }
}

/// Forward-slash, no leading `./`.
pub fn normalize_slashes(path: &str) -> String {
    let replaced = path.replace('\\', "/");
    let mut trimmed = replaced.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

/// Path with its final extension removed (`src/a.test.ts` -> `src/a.test`).
pub fn strip_extension(path: &str) -> &str {
    let file_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..file_start + dot],
        _ => path,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  CONTEXT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechProfile {
    pub languages: BTreeSet<String>,
    pub frameworks: BTreeSet<String>,
    pub libraries: BTreeSet<String>,
    pub test_frameworks: BTreeSet<String>,
    pub tooling: BTreeSet<String>,
}

impl TechProfile {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
            && self.frameworks.is_empty()
            && self.libraries.is_empty()
            && self.test_frameworks.is_empty()
            && self.tooling.is_empty()
    }
}

/// The unit of work passed between context construction, synthesis and
/// scoring. Built once per request; rebuild rather than patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentContext {
    pub diff_entries: Vec<DiffEntry>,
    pub related_files: Vec<SourceFile>,
    pub tech_profile: TechProfile,
}

impl AssessmentContext {
    /// Related files that are themselves part of the diff. Matching ignores
    /// the extension so renamed-extension edits still line up.
    pub fn changed_files(&self) -> Vec<&SourceFile> {
        let changed: BTreeSet<&str> = self
            .diff_entries
            .iter()
            .filter(|d| !d.is_removed())
            .map(|d| strip_extension(&d.path))
            .collect();
        self.related_files
            .iter()
            .filter(|f| changed.contains(strip_extension(&f.path)))
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  RUBRICS
// ═══════════════════════════════════════════════════════════════════════════

/// One named, weighted rubric dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    #[serde(alias = "criteria_label")]
    pub name: String,
    #[serde(default, alias = "description")]
    pub definition: String,
    #[serde(alias = "importance")]
    pub weight: f64,
}

pub const MIN_CRITERION_WEIGHT: f64 = 1.0;
pub const MAX_CRITERION_WEIGHT: f64 = 10.0;

impl Criterion {
    pub fn new(name: impl Into<String>, definition: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            definition: definition.into(),
            weight,
        }
    }

    pub fn validate(&self) -> AssayResult<()> {
        if self.name.trim().is_empty() {
            return Err(AssayError::invalid_rubric("criterion name is empty"));
        }
        if !self.weight.is_finite()
            || !(MIN_CRITERION_WEIGHT..=MAX_CRITERION_WEIGHT).contains(&self.weight)
        {
            return Err(AssayError::invalid_rubric(format!(
                "criterion '{}' has weight {} outside {}..={}",
                self.name, self.weight, MIN_CRITERION_WEIGHT, MAX_CRITERION_WEIGHT
            )));
        }
        Ok(())
    }
}

/// Parse a user-supplied criteria list. Malformed rubrics are rejected.
pub fn parse_criteria(json: &str) -> AssayResult<Vec<Criterion>> {
    let criteria: Vec<Criterion> =
        serde_json::from_str(json).map_err(|e| AssayError::invalid_rubric(e.to_string()))?;
    for criterion in &criteria {
        criterion.validate()?;
    }
    Ok(criteria)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modularity {
    pub max_function_loc: usize,
    pub duplication_rule: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantitativeBaselines {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_function_loc: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests_added: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_helper_usage: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_coverage_pct: Option<f64>,
}

/// Observed "senior-level" conventions used as an extra scoring rubric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleSheet {
    pub layering: String,
    pub validation: String,
    pub error_handling: String,
    pub naming: String,
    pub modularity: Modularity,
    pub testing: String,
    pub logging: String,
    pub security: String,
    pub api_contract: String,
    #[serde(default)]
    pub exemplars: BTreeMap<String, SourceFile>,
    #[serde(default)]
    pub quantitative: QuantitativeBaselines,
    #[serde(default)]
    pub naming_examples: Vec<String>,
}

pub fn parse_style_sheet(json: &str) -> AssayResult<StyleSheet> {
    serde_json::from_str(json).map_err(|e| AssayError::invalid_rubric(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
//  RESULTS
// ═══════════════════════════════════════════════════════════════════════════

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Clamp a raw score into the closed score range. NaN maps to the floor.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        MIN_SCORE
    } else {
        raw.clamp(MIN_SCORE, MAX_SCORE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionScore {
    pub name: String,
    pub score: f64,
    pub justification: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub weight: f64,
}

impl CriterionScore {
    pub fn new(
        criterion: &Criterion,
        score: f64,
        justification: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self {
            name: criterion.name.clone(),
            score: clamp_score(score),
            justification: justification.into(),
            suggestions,
            weight: criterion.weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub name: String,
    pub message: String,
}

pub const HARNESS_ERROR_NAME: &str = "harness error";

/// Aggregate of one sandbox execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_tests: Option<Vec<FailedTest>>,
}

impl TestOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The well-formed outcome returned when the harness itself blows up.
    pub fn harness_error(message: impl Into<String>) -> Self {
        Self {
            total: 0,
            passed: 0,
            failed: 0,
            duration_ms: None,
            failed_tests: Some(vec![FailedTest {
                name: HARNESS_ERROR_NAME.to_string(),
                message: message.into(),
            }]),
        }
    }

    pub fn is_harness_error(&self) -> bool {
        self.total == 0
            && self
                .failed_tests
                .as_deref()
                .is_some_and(|tests| tests.iter().any(|t| t.name == HARNESS_ERROR_NAME))
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failed_tests
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_tests
            .as_deref()
            .is_some_and(|tests| !tests.is_empty())
    }

    pub fn pass_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.passed as f64 / self.total as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallScore {
    pub weighted_score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Terminal artifact of one assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentReport {
    pub by_user_criteria: Vec<CriterionScore>,
    pub by_style_criteria: Vec<CriterionScore>,
    pub tests: TestOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<OverallScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score_bounds() {
        assert_eq!(clamp_score(150.0), 100.0);
        assert_eq!(clamp_score(-10.0), 0.0);
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(42.5), 42.5);
    }

    #[test]
    fn test_source_file_normalizes_paths() {
        let file = SourceFile::new(".\\src\\lib\\a.ts", "");
        assert_eq!(file.path, "src/lib/a.ts");
        assert_eq!(file.extension().as_deref(), Some("ts"));
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("src/a.test.ts"), "src/a.test");
        assert_eq!(strip_extension("src/.env"), "src/.env");
        assert_eq!(strip_extension("Makefile"), "Makefile");
        assert_eq!(strip_extension("a.b/c"), "a.b/c");
    }

    #[test]
    fn test_diff_entry_rejects_traversal() {
        let entry = DiffEntry::new("../secrets.txt", DiffStatus::Modified);
        let err = entry.validate().unwrap_err();
        assert!(err.is_input_error());
        assert!(DiffEntry::new("/etc/passwd", DiffStatus::Added)
            .validate()
            .is_err());
        assert!(DiffEntry::new("src/a.ts", DiffStatus::Added)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_parse_diff_entries_camel_case() {
        let json = r#"[{"path":"src/b.tsx","status":"renamed","additions":3,"deletions":1,"previousPath":"src/b.jsx"}]"#;
        let entries = parse_diff_entries(json).unwrap();
        assert_eq!(entries[0].status, DiffStatus::Renamed);
        assert_eq!(entries[0].previous_path.as_deref(), Some("src/b.jsx"));
    }

    #[test]
    fn test_parse_diff_entries_rejects_unknown_status() {
        let json = r#"[{"path":"a.ts","status":"exploded","additions":0,"deletions":0}]"#;
        assert!(parse_diff_entries(json).is_err());
    }

    #[test]
    fn test_parse_criteria_accepts_legacy_field_names() {
        let json = r#"[{"criteria_label":"Readability","definition":"Clear names","importance":7}]"#;
        let criteria = parse_criteria(json).unwrap();
        assert_eq!(criteria[0].name, "Readability");
        assert_eq!(criteria[0].weight, 7.0);
    }

    #[test]
    fn test_parse_criteria_rejects_out_of_range_weight() {
        let json = r#"[{"name":"Readability","definition":"x","weight":11}]"#;
        let err = parse_criteria(json).unwrap_err();
        assert!(matches!(err, AssayError::InvalidRubric(_)));
    }

    #[test]
    fn test_changed_files_ignores_extension_and_removed_entries() {
        let ctx = AssessmentContext {
            diff_entries: vec![
                DiffEntry::new("src/a.js", DiffStatus::Modified),
                DiffEntry::new("src/gone.ts", DiffStatus::Removed),
            ],
            related_files: vec![
                SourceFile::new("src/a.ts", "export function a() {}"),
                SourceFile::new("src/b.ts", ""),
            ],
            tech_profile: TechProfile::default(),
        };
        let changed: Vec<_> = ctx.changed_files().iter().map(|f| f.path.clone()).collect();
        assert_eq!(changed, vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn test_harness_error_outcome_shape() {
        let outcome = TestOutcome::harness_error("boom");
        assert_eq!(outcome.total, 0);
        assert!(outcome.is_harness_error());
        assert_eq!(outcome.failed_names(), vec![HARNESS_ERROR_NAME]);
        assert_eq!(outcome.pass_rate(), None);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = AssessmentReport::default();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("byUserCriteria"));
        assert!(json.contains("byStyleCriteria"));
        assert!(!json.contains("overall"));
    }
}
