use assay_core::util::char_prefix;
use assay_core::{AssessmentContext, Criterion, SourceFile, StyleSheet};
use std::fmt::Write as _;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

const RELATED_FILES_IN_PROMPT: usize = 3;
const RELATED_FILE_EXCERPT_CHARS: usize = 800;
const EXEMPLARS_IN_PROMPT: usize = 2;
const EXEMPLAR_EXCERPT_CHARS: usize = 400;
const TEST_SOURCE_EXCERPT_CHARS: usize = 4_000;
const STYLE_SAMPLE_FILES: usize = 2;
const STYLE_SAMPLE_CHARS: usize = 300;

/// Response contract shared by every rubric prompt.
const SCORE_CONTRACT: &str = r#"Respond with a JSON array containing one object for each criterion, in this exact format:
[
  {
    "name": "<criterion name exactly as given>",
    "score": <number 0-100>,
    "justification": "<explanation referencing the code>",
    "suggestions": ["<improvement 1>", "<improvement 2>"]
  }
]
Return only the JSON array."#;

fn push_code_context(prompt: &mut String, ctx: &AssessmentContext) {
    let profile = serde_json::to_string_pretty(&ctx.tech_profile).unwrap_or_else(|_| "{}".into());
    let _ = writeln!(prompt, "**Code Context:**\nTech Stack: {}\n", profile);

    prompt.push_str("**Changed Files:**\n");
    if ctx.diff_entries.is_empty() {
        prompt.push_str("(none)\n");
    }
    for entry in &ctx.diff_entries {
        let _ = writeln!(
            prompt,
            "- {} ({}): +{} -{}",
            entry.path,
            entry.status.as_str(),
            entry.additions,
            entry.deletions
        );
    }

    prompt.push_str("\n**Related Code Files:**\n");
    for file in ctx.related_files.iter().take(RELATED_FILES_IN_PROMPT) {
        let _ = writeln!(
            prompt,
            "\nFile: {}\n```\n{}\n```",
            file.path,
            char_prefix(&file.content, RELATED_FILE_EXCERPT_CHARS)
        );
    }
    prompt.push('\n');
}

fn push_criteria(prompt: &mut String, heading: &str, label: &str, criteria: &[Criterion]) {
    let _ = writeln!(prompt, "**{}:**", heading);
    for (index, criterion) in criteria.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. **{}**\n   {}: {}\n   Weight: {}/10",
            index + 1,
            criterion.name,
            label,
            criterion.definition,
            criterion.weight
        );
    }
    prompt.push('\n');
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Score a change against user-supplied criteria.
pub fn criteria_prompt(ctx: &AssessmentContext, criteria: &[Criterion]) -> String {
    let mut prompt = String::from(
        "You are a senior code reviewer evaluating a pull request based on multiple criteria.\n\n",
    );
    push_code_context(&mut prompt, ctx);
    push_criteria(&mut prompt, "Evaluation Criteria", "Definition", criteria);
    prompt.push_str(
        r#"**Instructions:**
1. Evaluate the code changes against ALL criteria listed above.
2. For each criterion, give a score from 0-100 (100 is perfect adherence).
3. Justify each score clearly.
4. Suggest 2-3 specific improvements when the score is below 90.

"#,
    );
    prompt.push_str(SCORE_CONTRACT);
    prompt
}

/// Score a change against the senior style sheet, with exemplars and baselines.
pub fn style_criteria_prompt(
    ctx: &AssessmentContext,
    criteria: &[Criterion],
    sheet: &StyleSheet,
) -> String {
    let mut prompt = String::from(
        "You are a senior software architect evaluating a pull request against established senior-level coding standards.\n\n",
    );
    push_code_context(&mut prompt, ctx);

    prompt.push_str("**Exemplar Code Examples:**\n");
    if sheet.exemplars.is_empty() {
        prompt.push_str("No exemplars provided\n");
    }
    for (key, example) in sheet.exemplars.iter().take(EXEMPLARS_IN_PROMPT) {
        let _ = writeln!(
            prompt,
            "\n{}: {}\n```\n{}\n```",
            key,
            example.path,
            char_prefix(&example.content, EXEMPLAR_EXCERPT_CHARS)
        );
    }

    let q = &sheet.quantitative;
    let na = |v: Option<String>| v.unwrap_or_else(|| "N/A".to_string());
    let _ = writeln!(
        prompt,
        "\n**Quantitative Metrics:**\n- Average Function LOC: {}\n- Tests Added: {}\n- Error Helper Usage: {}\n- Validation Coverage: {}\n",
        na(q.avg_function_loc.map(|v| format!("{:.1}", v))),
        na(q.tests_added.map(|v| v.to_string())),
        na(q.error_helper_usage.map(|v| v.to_string())),
        na(q.validation_coverage_pct.map(|v| format!("{:.0}%", v))),
    );

    push_criteria(&mut prompt, "Senior-Level Evaluation Criteria", "Standards", criteria);
    prompt.push_str(
        r#"**Instructions:**
1. Evaluate the code changes against ALL senior-level standards listed above.
2. Compare against the exemplar code and quantitative metrics.
3. For each criterion, give a score from 0-100 (100 is exceptional senior-level quality).
4. Justify each score with specific code references.
5. Suggest concrete improvements aligned with senior engineering practice.

"#,
    );
    prompt.push_str(SCORE_CONTRACT);
    prompt
}

/// Ask for a test file covering `file`'s exported functions.
pub fn test_synthesis_prompt(file: &SourceFile, exported: &[String], import_path: &str) -> String {
    let mut prompt = String::from(
        "Write a Jest test file for the following code. Return only the raw code, with no markdown fences, explanations or commentary.\nFocus on exported functions.\n",
    );
    if !exported.is_empty() {
        let _ = writeln!(prompt, "Exported functions: {}", exported.join(", "));
    }
    let _ = writeln!(
        prompt,
        "Import the module under test from '{}'.\n\nFile: {}\n{}",
        import_path,
        file.path,
        char_prefix(&file.content, TEST_SOURCE_EXCERPT_CHARS)
    );
    prompt
}

/// Ask for a short summary of one style dimension from sample files.
pub fn style_summary_prompt(dimension: &str, samples: &[SourceFile]) -> String {
    let mut prompt = format!(
        "Summarize the codebase's {} style in 2-3 sentences, focusing on best practices and patterns you observe. Use the following code samples as context:\n\n",
        dimension
    );
    for file in samples.iter().take(STYLE_SAMPLE_FILES) {
        let _ = writeln!(
            prompt,
            "File: {}\n{}\n",
            file.path,
            char_prefix(&file.content, STYLE_SAMPLE_CHARS)
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_core::{DiffEntry, DiffStatus};

    fn context() -> AssessmentContext {
        let mut entry = DiffEntry::new("src/a.ts", DiffStatus::Modified);
        entry.additions = 3;
        entry.deletions = 1;
        AssessmentContext {
            diff_entries: vec![entry],
            related_files: (0..5)
                .map(|i| SourceFile::new(format!("src/f{}.ts", i), "x".repeat(2_000)))
                .collect(),
            ..AssessmentContext::default()
        }
    }

    #[test]
    fn test_criteria_prompt_bounds_related_excerpts() {
        let criteria = vec![Criterion::new("Readability", "Clear names", 5.0)];
        let prompt = criteria_prompt(&context(), &criteria);
        assert!(prompt.contains("- src/a.ts (modified): +3 -1"));
        assert!(prompt.contains("File: src/f2.ts"));
        assert!(!prompt.contains("File: src/f3.ts"));
        assert!(!prompt.contains(&"x".repeat(801)));
        assert!(prompt.contains("1. **Readability**\n   Definition: Clear names\n   Weight: 5/10"));
        assert!(prompt.ends_with("Return only the JSON array."));
    }

    #[test]
    fn test_style_prompt_marks_missing_metrics() {
        let criteria = vec![Criterion::new("Naming Conventions", "camelCase", 10.0)];
        let prompt = style_criteria_prompt(&context(), &criteria, &StyleSheet::default());
        assert!(prompt.contains("No exemplars provided"));
        assert!(prompt.contains("- Average Function LOC: N/A"));
        assert!(prompt.contains("Standards: camelCase"));
    }

    #[test]
    fn test_style_summary_prompt_uses_two_samples() {
        let samples: Vec<SourceFile> = (0..3)
            .map(|i| SourceFile::new(format!("s{}.js", i), "y".repeat(500)))
            .collect();
        let prompt = style_summary_prompt("naming", &samples);
        assert!(prompt.starts_with("Summarize the codebase's naming style"));
        assert!(prompt.contains("File: s1.js"));
        assert!(!prompt.contains("File: s2.js"));
        assert!(!prompt.contains(&"y".repeat(301)));
    }
}
