//! Directed file-import graph with reverse (imported-by) edges.

use crate::scan::{self, SOURCE_EXTENSIONS};
use crate::util::normalize_relative;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct ImportGraph {
    imports: HashMap<String, Vec<String>>,
    importers: HashMap<String, Vec<String>>,
}

impl ImportGraph {
    /// Build from repo-relative path -> content. Iterating the map in path
    /// order leaves every importer list sorted.
    pub fn build(files: &BTreeMap<String, String>) -> Self {
        let mut graph = ImportGraph::default();
        for (path, content) in files {
            let mut resolved: Vec<String> = Vec::new();
            for spec in scan::imports(content) {
                let Some(target) = resolve_specifier(path, &spec, |p| files.contains_key(p))
                else {
                    continue;
                };
                if target != *path && !resolved.contains(&target) {
                    resolved.push(target);
                }
            }
            for target in &resolved {
                graph
                    .importers
                    .entry(target.clone())
                    .or_default()
                    .push(path.clone());
            }
            if !resolved.is_empty() {
                debug!(file = %path, imports = resolved.len(), "resolved imports");
            }
            graph.imports.insert(path.clone(), resolved);
        }
        graph
    }

    pub fn imports_of(&self, path: &str) -> &[String] {
        self.imports.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn importers_of(&self, path: &str) -> &[String] {
        self.importers.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Imports in textual order, then importers in path order.
    pub fn neighbors<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a String> + 'a {
        self.imports_of(path)
            .iter()
            .chain(self.importers_of(path).iter())
    }

    pub fn edge_count(&self) -> usize {
        self.imports.values().map(Vec::len).sum()
    }

    /// Breadth-first expansion from `seeds` over both edge directions.
    ///
    /// Seeds come first in the result. Nothing visited is re-queued, and the
    /// result never exceeds `cap`.
    pub fn expand(&self, seeds: &[String], hops: usize, cap: usize) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut related: Vec<String> = Vec::new();
        let mut frontier: Vec<&str> = Vec::new();

        for seed in seeds {
            if visited.insert(seed.as_str()) {
                related.push(seed.clone());
                frontier.push(seed.as_str());
            }
        }

        'hops: for _ in 0..hops {
            if related.len() >= cap {
                break;
            }
            let mut next: Vec<&str> = Vec::new();
            for file in &frontier {
                for neighbor in self.neighbors(file) {
                    if visited.insert(neighbor.as_str()) {
                        related.push(neighbor.clone());
                        next.push(neighbor.as_str());
                        if related.len() >= cap {
                            break 'hops;
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        related.truncate(cap);
        related
    }
}

/// Resolve a relative specifier against the importing file.
///
/// Tries the literal path, then each recognized extension, then
/// `<dir>/index.<ext>`. Bare (package) specifiers never resolve.
pub fn resolve_specifier(
    from: &str,
    spec: &str,
    exists: impl Fn(&str) -> bool,
) -> Option<String> {
    if !spec.starts_with('.') {
        return None;
    }
    let dir = match from.rfind('/') {
        Some(idx) => &from[..idx],
        None => "",
    };
    let joined = if dir.is_empty() {
        spec.to_string()
    } else {
        format!("{}/{}", dir, spec)
    };
    let base = normalize_relative(&joined)?;
    if base.is_empty() {
        return None;
    }

    if exists(&base) {
        return Some(base);
    }
    for ext in SOURCE_EXTENSIONS {
        let candidate = format!("{}.{}", base, ext);
        if exists(&candidate) {
            return Some(candidate);
        }
    }
    for ext in SOURCE_EXTENSIONS {
        let candidate = format!("{}/index.{}", base, ext);
        if exists(&candidate) {
            return Some(candidate);
        }
    }
    None
}
