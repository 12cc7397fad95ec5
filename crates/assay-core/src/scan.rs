//! Best-effort source scanners and file predicates.
//!
//! Everything here is regex-driven and approximate. Callers only see
//! "given text, return imports / exported names / route literals" so a real
//! parser can replace any scanner without touching the pipeline.

use crate::model::SourceFile;
use regex::Regex;
use std::sync::OnceLock;

/// Extensions that take part in the import graph, in resolution order.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "vue", "svelte", "json", "py", "go", "rs", "java",
    "kt", "rb", "php", "cs", "swift", "scala", "c", "h", "cpp", "hpp",
];

/// Extensions probed when a diff path no longer exists on disk.
pub const SIBLING_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx"];

/// Directory names never descended into.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".next",
    ".nuxt",
    ".cache",
    ".assay",
    "dist",
    "build",
    "coverage",
    "target",
    "vendor",
    ".vscode",
    ".idea",
    "__pycache__",
    ".pytest_cache",
    "logs",
    "temp",
    "tmp",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

pub fn is_source_extension(ext: &str) -> bool {
    SOURCE_EXTENSIONS.contains(&ext)
}

/// Human-readable language for an extension; `None` for data files.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" | "mjs" | "cjs" => "JavaScript",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "py" => "Python",
        "go" => "Go",
        "rs" => "Rust",
        "java" => "Java",
        "kt" => "Kotlin",
        "rb" => "Ruby",
        "php" => "PHP",
        "cs" => "C#",
        "swift" => "Swift",
        "scala" => "Scala",
        "c" | "h" => "C",
        "cpp" | "hpp" => "C++",
        _ => return None,
    };
    Some(lang)
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r#"(?:\bimport\s[^'";]*?\bfrom\s*['"]([^'"]+)['"])|(?:\bexport\s[^'";]*?\bfrom\s*['"]([^'"]+)['"])|(?:\bimport\s*['"]([^'"]+)['"])|(?:\bimport\s*\(\s*['"]([^'"]+)['"]\s*\))|(?:\brequire\s*\(\s*['"]([^'"]+)['"]\s*\))"#,
    )
}

fn exported_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"\bexport\s+(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)",
    )
}

fn route_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r#"\b(?:router|app)\.(?:get|post|put|delete|patch)\(\s*['"](/api/[\w/-]+)['"]"#,
    )
}

fn route_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"\b(?:fetch|axios\.\w+)\(\s*['"`](/api/[\w/-]+)"#)
}

fn describe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"\bdescribe\s*\(")
}

fn function_body_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?s)function\s+\w+\s*\([^)]*\)\s*\{(.*?)\}|const\s+\w+\s*=\s*(?:async\s*)?\([^)]*\)\s*=>\s*\{(.*?)\}|\w+\s*:\s*\([^)]*\)\s*=>\s*\{(.*?)\}",
    )
}

/// Module specifiers referenced by import/require forms, in textual order.
pub fn imports(text: &str) -> Vec<String> {
    import_re()
        .captures_iter(text)
        .filter_map(|caps| (1..=5).find_map(|i| caps.get(i)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Names of exported function declarations. Misses are acceptable.
pub fn exported_functions(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in exported_fn_re().captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// `/api/...` paths registered by router/app handlers.
pub fn route_literals(text: &str) -> Vec<String> {
    route_re()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// `/api/...` paths called via fetch or axios.
pub fn route_calls(text: &str) -> Vec<String> {
    route_call_re()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Line counts of function bodies found in `text`.
pub fn function_lengths(text: &str) -> Vec<usize> {
    function_body_re()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .filter(|body| !body.as_str().is_empty())
        .map(|body| body.as_str().split('\n').count())
        .collect()
}

pub fn is_test_file(file: &SourceFile) -> bool {
    let path = file.path.to_ascii_lowercase();
    path.contains("test") || path.contains("spec") || describe_re().is_match(&file.content)
}

pub fn is_route_file(file: &SourceFile) -> bool {
    !route_literals(&file.content).is_empty()
        || ["router.get", "router.post", "router.put", "router.delete", "router.patch"]
            .iter()
            .any(|needle| file.content.contains(needle))
}

pub fn is_validation_file(file: &SourceFile) -> bool {
    ["zod", "joi", "yup", "validate"]
        .iter()
        .any(|needle| file.content.contains(needle))
}

pub fn is_service_file(file: &SourceFile) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let class_re = regex(&RE, r"class\s+\w+Service\b");
    let path = file.path.to_ascii_lowercase();
    ["service", "usecase", "logic"]
        .iter()
        .any(|needle| path.contains(needle))
        || class_re.is_match(&file.content)
}

pub fn uses_error_helper(file: &SourceFile) -> bool {
    file.content.contains("errorHelper") || file.content.contains("handleError")
}

/// Type annotations, interfaces, or generics typical of typed script.
pub fn has_typed_syntax(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?m)\binterface\s+\w+\s*\{|\btype\s+\w+\s*=|:\s*(?:string|number|boolean|void|any|unknown)\b|\bas\s+const\b|<\w+>\(",
    )
    .is_match(text)
}

/// Component markup (JSX-style tags) in script source.
pub fn has_markup(text: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(
        &RE,
        r"(?m)(?:return\s*\(?\s*|render\(\s*|=>\s*\(?\s*)<[A-Za-z][\w.]*[\s/>]|</[A-Za-z][\w.]*>|@testing-library/react",
    )
    .is_match(text)
}
