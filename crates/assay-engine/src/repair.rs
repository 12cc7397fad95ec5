//! Test Repair: drop synthesized test cases that failed.
//!
//! Works on the syntax tree so only whole `it(...)`/`test(...)` statements
//! are removed; every other line of the file is kept byte for byte.

use assay_core::util::join_within;
use assay_core::{SourceFile, TestOutcome};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use tree_sitter::{Node, Parser, Tree};

const SUITE_FAILED_SUFFIX: &str = " (suite failed to run)";

thread_local! {
    static JS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_javascript::LANGUAGE.into());
        p
    });

    static TS_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into());
        p
    });

    static TSX_PARSER: RefCell<Parser> = RefCell::new({
        let mut p = Parser::new();
        let _ = p.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into());
        p
    });
}

/// Parse with the grammar matching the file's extension. JavaScript's
/// grammar already accepts JSX.
fn parse(path: &str, content: &str) -> anyhow::Result<Tree> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let tree = match ext.as_str() {
        "tsx" => TSX_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        "ts" | "mts" | "cts" => TS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
        _ => JS_PARSER.with(|p| p.borrow_mut().parse(content, None)),
    };
    tree.ok_or_else(|| anyhow::anyhow!("Failed to parse {}", path))
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Value of a plain string (or substitution-free template) literal.
fn string_literal(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => {
            let raw = node_text(node, source);
            let inner = raw.get(1..raw.len().saturating_sub(1))?;
            Some(unescape(inner))
        }
        "template_string" => {
            let mut cursor = node.walk();
            if node
                .named_children(&mut cursor)
                .any(|c| c.kind() == "template_substitution")
            {
                return None;
            }
            let raw = node_text(node, source);
            raw.get(1..raw.len().saturating_sub(1)).map(unescape)
        }
        _ => None,
    }
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `it`, `test` or `describe`, bare or as `.only`/`.skip`.
fn callee_base<'a>(call: Node<'_>, source: &'a str) -> Option<&'a str> {
    let callee = call.child_by_field_name("function")?;
    match callee.kind() {
        "identifier" => Some(node_text(callee, source)),
        "member_expression" => {
            let object = callee.child_by_field_name("object")?;
            let property = callee.child_by_field_name("property")?;
            let modifier = node_text(property, source);
            if object.kind() == "identifier" && matches!(modifier, "only" | "skip") {
                Some(node_text(object, source))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// `it.each(table)(...)` / `test.each(table)(...)`.
fn is_each_table(call: Node<'_>, source: &str) -> bool {
    let Some(inner) = call.child_by_field_name("function") else {
        return false;
    };
    if inner.kind() != "call_expression" {
        return false;
    }
    let Some(member) = inner.child_by_field_name("function") else {
        return false;
    };
    member.kind() == "member_expression"
        && member
            .child_by_field_name("object")
            .is_some_and(|o| matches!(node_text(o, source), "it" | "test"))
        && member
            .child_by_field_name("property")
            .is_some_and(|p| node_text(p, source) == "each")
}

fn first_string_argument(call: Node<'_>, source: &str) -> Option<String> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let first = args.named_children(&mut cursor).next()?;
    string_literal(first, source)
}

fn enclosing_statement(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "expression_statement" => return Some(n),
            "program" | "statement_block" | "arrow_function" | "function_expression" => return None,
            _ => current = n.parent(),
        }
    }
    None
}

/// Byte range to cut for a failing test call, and what replaces it.
///
/// A test that is the expression body of an arrow (`() => it(...)`) is
/// swapped for an empty block so the arrow stays valid.
fn removal_for(call: Node<'_>) -> Option<(usize, usize, &'static str)> {
    if let Some(parent) = call.parent() {
        if parent.kind() == "arrow_function" && parent.child_by_field_name("body") == Some(call) {
            return Some((call.start_byte(), call.end_byte(), "{}"));
        }
    }
    enclosing_statement(call).map(|stmt| (stmt.start_byte(), stmt.end_byte(), ""))
}

struct Collector<'s> {
    source: &'s str,
    failing: &'s HashSet<&'s str>,
    titles: Vec<String>,
    ranges: Vec<(usize, usize, &'static str)>,
    /// Test declarations left in place.
    kept: usize,
}

impl Collector<'_> {
    fn visit(&mut self, node: Node<'_>) {
        if node.kind() == "call_expression" {
            let base = callee_base(node, self.source);
            let title = first_string_argument(node, self.source);
            match (base, title) {
                (Some("describe"), Some(title)) => {
                    self.titles.push(title);
                    self.visit_children(node);
                    self.titles.pop();
                    return;
                }
                (Some("it" | "test"), Some(title)) => {
                    let mut full = self.titles.clone();
                    full.push(title.clone());
                    let full = full.join(" ");
                    if self.failing.contains(full.as_str()) || self.failing.contains(title.as_str()) {
                        if let Some(range) = removal_for(node) {
                            debug!(test = %full, "removing failing test");
                            self.ranges.push(range);
                            return;
                        }
                        warn!(test = %full, "failing test is not a removable statement");
                    }
                    self.kept += 1;
                }
                (Some("it" | "test"), None) => self.kept += 1,
                (None, _) if is_each_table(node, self.source) => self.kept += 1,
                _ => {}
            }
        }
        self.visit_children(node);
    }

    fn visit_children(&mut self, node: Node<'_>) {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                self.visit(child);
            }
        }
    }
}

/// Widen a statement range to its whole line when nothing else shares it.
fn widen_to_lines(source: &str, start: usize, end: usize) -> (usize, usize) {
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let start = if source[line_start..start].trim().is_empty() {
        line_start
    } else {
        start
    };
    let rest = &source[end..];
    let line_end = rest.find('\n').map(|i| end + i + 1).unwrap_or(source.len());
    let end = if source[end..line_end].trim().is_empty() {
        line_end
    } else {
        end
    };
    (start, end)
}

/// Source with every statement declaring a failing test removed, or `None`
/// when nothing matched.
pub fn strip_failing_cases(path: &str, content: &str, failing: &HashSet<&str>) -> anyhow::Result<Option<String>> {
    let tree = parse(path, content)?;
    if tree.root_node().has_error() {
        anyhow::bail!("{} does not parse cleanly", path);
    }

    let mut collector = Collector {
        source: content,
        failing,
        titles: Vec::new(),
        ranges: Vec::new(),
        kept: 0,
    };
    collector.visit(tree.root_node());
    if collector.ranges.is_empty() {
        return Ok(None);
    }

    let mut ranges: Vec<(usize, usize, &str)> = collector
        .ranges
        .into_iter()
        .map(|(s, e, with)| {
            if with.is_empty() {
                let (s, e) = widen_to_lines(content, s, e);
                (s, e, with)
            } else {
                (s, e, with)
            }
        })
        .collect();
    ranges.sort_unstable();

    let mut out = String::with_capacity(content.len());
    let mut cursor = 0;
    for (start, end, with) in ranges {
        if start < cursor {
            cursor = cursor.max(end);
            continue;
        }
        out.push_str(&content[cursor..start]);
        out.push_str(with);
        cursor = end;
    }
    out.push_str(&content[cursor..]);

    if parse(path, &out)?.root_node().has_error() {
        anyhow::bail!("{} no longer parses after removing failing tests", path);
    }
    Ok(Some(out))
}

/// Number of `it`/`test` declarations in `content`.
pub fn count_test_cases(path: &str, content: &str) -> anyhow::Result<usize> {
    let tree = parse(path, content)?;
    let none = HashSet::new();
    let mut collector = Collector {
        source: content,
        failing: &none,
        titles: Vec::new(),
        ranges: Vec::new(),
        kept: 0,
    };
    collector.visit(tree.root_node());
    Ok(collector.kept)
}

fn drop_file(target: &Result<std::path::PathBuf, String>) {
    if let Ok(target) = target {
        let _ = fs::remove_file(target);
    }
}

fn suite_failed(file: &SourceFile, failing: &HashSet<&str>) -> bool {
    let name = file.path.rsplit('/').next().unwrap_or(&file.path);
    failing.contains(format!("{}{}", name, SUITE_FAILED_SUFFIX).as_str())
}

/// Remove every test whose name appears in `outcome.failed_tests` and
/// persist the rewritten files under `test_dir`.
///
/// A file that fails to parse passes through unchanged. A file whose whole
/// suite failed to run, or that has no tests left, is dropped. With no failures the input is returned
/// as is.
pub fn remove_failing_tests(
    tests: &[SourceFile],
    outcome: &TestOutcome,
    test_dir: &Path,
) -> Vec<SourceFile> {
    if !outcome.has_failures() {
        return tests.to_vec();
    }
    let failing: HashSet<&str> = outcome.failed_names().into_iter().collect();

    let mut repaired = Vec::with_capacity(tests.len());
    let mut removed_files = 0usize;
    let mut rewritten = 0usize;
    for file in tests {
        let target = join_within(test_dir, &file.path);

        if suite_failed(file, &failing) {
            warn!(path = %file.path, "dropping test file whose suite failed to run");
            drop_file(&target);
            removed_files += 1;
            continue;
        }

        let content = match strip_failing_cases(&file.path, &file.content, &failing) {
            Ok(Some(content)) => content,
            Ok(None) => {
                repaired.push(file.clone());
                continue;
            }
            Err(err) => {
                warn!(path = %file.path, error = %err, "skipping repair");
                repaired.push(file.clone());
                continue;
            }
        };

        // The harness rejects a suite without tests, so an emptied file goes.
        if matches!(count_test_cases(&file.path, &content), Ok(0)) {
            debug!(path = %file.path, "no tests left; dropping file");
            drop_file(&target);
            removed_files += 1;
            continue;
        }

        match &target {
            Ok(target) => {
                let written = target
                    .parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .and_then(|_| fs::write(target, &content));
                if let Err(err) = written {
                    warn!(path = %target.display(), error = %err, "failed to persist repaired test");
                }
            }
            Err(err) => warn!(path = %file.path, error = %err, "refusing to persist repaired test"),
        }
        rewritten += 1;
        repaired.push(file.with_content(content));
    }

    info!(rewritten, removed_files, "repaired synthesized tests");
    repaired
}
