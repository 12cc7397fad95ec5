//! Style-sheet derivation and the senior style rubric.

use crate::llm::prompts;
use assay_core::scan::{
    exported_functions, function_lengths, is_route_file, is_service_file, is_test_file,
    is_validation_file, uses_error_helper,
};
use assay_core::{Criterion, Generate, Modularity, QuantitativeBaselines, SourceFile, StyleSheet};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const STYLE_CRITERION_WEIGHT: f64 = 10.0;
const DUPLICATION_RULE: &str = "Avoid duplicate code by extracting helpers.";

/// The prose dimensions of a style sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Layering,
    Validation,
    ErrorHandling,
    Naming,
    Testing,
    Logging,
    Security,
    ApiContract,
}

impl Dimension {
    const ALL: [Dimension; 8] = [
        Dimension::Layering,
        Dimension::Validation,
        Dimension::ErrorHandling,
        Dimension::Naming,
        Dimension::Testing,
        Dimension::Logging,
        Dimension::Security,
        Dimension::ApiContract,
    ];

    fn label(self) -> &'static str {
        match self {
            Dimension::Layering => "layering",
            Dimension::Validation => "validation",
            Dimension::ErrorHandling => "error handling",
            Dimension::Naming => "naming",
            Dimension::Testing => "testing",
            Dimension::Logging => "logging",
            Dimension::Security => "security",
            Dimension::ApiContract => "API contract",
        }
    }

    fn heuristic(self) -> &'static str {
        match self {
            Dimension::Layering => {
                "Uses clear separation of concerns with routes, services, and validation."
            }
            Dimension::Validation => {
                "Validation is performed using schema libraries and explicit checks."
            }
            Dimension::ErrorHandling => "Error handling uses helpers and try/catch blocks.",
            Dimension::Naming => {
                "Naming follows camelCase for functions and PascalCase for classes."
            }
            Dimension::Testing => "Tests are present for most modules, using describe/it blocks.",
            Dimension::Logging => "Logging is performed using console or logger libraries.",
            Dimension::Security => "Security checks are present for user input and API endpoints.",
            Dimension::ApiContract => {
                "API contracts are defined via route handlers and validation schemas."
            }
        }
    }

    fn slot(self, sheet: &mut StyleSheet) -> &mut String {
        match self {
            Dimension::Layering => &mut sheet.layering,
            Dimension::Validation => &mut sheet.validation,
            Dimension::ErrorHandling => &mut sheet.error_handling,
            Dimension::Naming => &mut sheet.naming,
            Dimension::Testing => &mut sheet.testing,
            Dimension::Logging => &mut sheet.logging,
            Dimension::Security => &mut sheet.security,
            Dimension::ApiContract => &mut sheet.api_contract,
        }
    }
}

async fn summarize(dimension: Dimension, files: &[SourceFile], generator: Option<&dyn Generate>) -> String {
    let Some(model) = generator else {
        return dimension.heuristic().to_string();
    };
    let prompt = prompts::style_summary_prompt(dimension.label(), files);
    match model.generate(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => dimension.heuristic().to_string(),
        Err(err) => {
            warn!(dimension = dimension.label(), error = %err, "style summary failed; using heuristic");
            dimension.heuristic().to_string()
        }
    }
}

fn quantitative(files: &[SourceFile]) -> (QuantitativeBaselines, usize) {
    let lengths: Vec<usize> = files.iter().flat_map(|f| function_lengths(&f.content)).collect();
    let validation_files: Vec<&SourceFile> = files.iter().filter(|f| is_validation_file(f)).collect();
    let validated = validation_files
        .iter()
        .filter(|f| f.content.contains("validate"))
        .count();

    let avg = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    };
    let coverage = if validation_files.is_empty() {
        0.0
    } else {
        validated as f64 / validation_files.len() as f64 * 100.0
    };

    let baselines = QuantitativeBaselines {
        avg_function_loc: Some(avg),
        tests_added: Some(files.iter().filter(|f| is_test_file(f)).count()),
        error_helper_usage: Some(files.iter().filter(|f| uses_error_helper(f)).count()),
        validation_coverage_pct: Some(coverage),
    };
    (baselines, lengths.into_iter().max().unwrap_or(0))
}

fn exemplars(files: &[SourceFile]) -> BTreeMap<String, SourceFile> {
    let mut picked = BTreeMap::new();
    let Some(first) = files.first() else {
        return picked;
    };
    let selectors: [(&str, fn(&SourceFile) -> bool); 4] = [
        ("route", is_route_file),
        ("service", is_service_file),
        ("test", is_test_file),
        ("validation", is_validation_file),
    ];
    for (key, matches) in selectors {
        let file = files.iter().find(|f| matches(f)).unwrap_or(first);
        picked.insert(key.to_string(), file.clone());
    }
    picked
}

/// Derive a style sheet from a sample of the codebase.
///
/// Baselines, exemplars and naming examples are computed locally; the prose
/// standards come from `generator`, with a fixed sentence per dimension when
/// it is absent or fails.
pub async fn derive_style_sheet(files: &[SourceFile], generator: Option<&dyn Generate>) -> StyleSheet {
    let (baselines, max_function_loc) = quantitative(files);

    let mut naming_examples = Vec::new();
    for file in files {
        naming_examples.extend(exported_functions(&file.content));
    }

    let mut sheet = StyleSheet {
        modularity: Modularity {
            max_function_loc,
            duplication_rule: DUPLICATION_RULE.to_string(),
        },
        exemplars: exemplars(files),
        quantitative: baselines,
        naming_examples,
        ..StyleSheet::default()
    };
    for dimension in Dimension::ALL {
        *dimension.slot(&mut sheet) = summarize(dimension, files, generator).await;
    }

    info!(
        files = files.len(),
        exemplars = sheet.exemplars.len(),
        "derived style sheet"
    );
    sheet
}

/// The nine senior dimensions as weighted criteria.
pub fn style_criteria(sheet: &StyleSheet) -> Vec<Criterion> {
    let modularity = format!(
        "Max function LOC: {}. {}",
        sheet.modularity.max_function_loc, sheet.modularity.duplication_rule
    );
    [
        ("Layering Architecture", sheet.layering.as_str()),
        ("Input Validation", sheet.validation.as_str()),
        ("Error Handling", sheet.error_handling.as_str()),
        ("Naming Conventions", sheet.naming.as_str()),
        ("Code Modularity", modularity.as_str()),
        ("Testing Standards", sheet.testing.as_str()),
        ("Logging Practices", sheet.logging.as_str()),
        ("Security Measures", sheet.security.as_str()),
        ("API Contract Design", sheet.api_contract.as_str()),
    ]
    .into_iter()
    .map(|(name, definition)| Criterion::new(name, definition, STYLE_CRITERION_WEIGHT))
    .collect()
}
