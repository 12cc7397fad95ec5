//! Lenient parsing of model replies.

use serde_json::Value;

/// Outcome of interpreting a model reply that should hold a JSON array.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Parsed(Vec<Value>),
    Unparsable(String),
}

impl ModelReply {
    pub fn is_parsed(&self) -> bool {
        matches!(self, ModelReply::Parsed(_))
    }
}

/// Strip markdown code fences from a response
pub(crate) fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```") {
        // Drop the info string (```json, ```tsx, ...) along with the fence.
        match rest.find('\n') {
            Some(idx) if rest[..idx].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &rest[idx + 1..]
            }
            _ => rest,
        }
    } else {
        trimmed
    };
    let clean = clean.trim_end();
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// Extract a balanced JSON fragment between matching delimiters
/// Properly handles nested structures and ignores delimiters inside strings
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }

    None
}

/// Try to fix common JSON issues from model responses
fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    fixed = fixed.replace(['\u{201C}', '\u{201D}'], "\"");
    fixed = fixed.replace(['\u{2018}', '\u{2019}'], "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn as_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["results", "criteria", "scores", "data"]
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::Array(items)) => Some(items.clone()),
                _ => None,
            }),
        _ => None,
    }
}

/// Interpret a reply that should be a JSON array.
///
/// Tries the text as-is, then the span from the first `[` to the last `]`
/// of the fence-stripped text, then the first balanced array.
pub fn parse_reply(raw: &str) -> ModelReply {
    if let Some(items) = as_array(raw.trim()) {
        return ModelReply::Parsed(items);
    }

    let clean = strip_markdown_fences(raw);
    if let (Some(start), Some(end)) = (clean.find('['), clean.rfind(']')) {
        if start < end {
            let span = &clean[start..=end];
            if let Some(items) = as_array(span).or_else(|| as_array(&fix_json_issues(span))) {
                return ModelReply::Parsed(items);
            }
        }
    }

    if let Some(fragment) = extract_json_fragment(clean, '[', ']') {
        if let Some(items) = as_array(&fix_json_issues(fragment)) {
            return ModelReply::Parsed(items);
        }
    }

    ModelReply::Unparsable(raw.to_string())
}

/// Raw source from a code-generation reply.
pub fn strip_code_fences(raw: &str) -> String {
    let clean = strip_markdown_fences(raw);
    let mut out = clean.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Truncate file contents for prompt safety (keep beginning + end)
pub(crate) fn truncate_content(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let head: String = content.chars().take(max_chars / 2).collect();
        let tail: String = content.chars().rev().take(max_chars / 2).collect::<String>();
        format!(
            "{}\n\n... [truncated] ...\n\n{}",
            head,
            tail.chars().rev().collect::<String>()
        )
    }
}
