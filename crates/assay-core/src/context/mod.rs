//! Context Builder: which files matter for a diff, and what the project is
//! built with.

pub mod graph;
pub mod profile;

pub use graph::{resolve_specifier, ImportGraph};
pub use profile::{infer_profile, read_manifest, Manifest};

use crate::error::{AssayError, AssayResult};
use crate::model::{normalize_slashes, strip_extension, AssessmentContext, DiffEntry, SourceFile};
use crate::scan::{self, is_ignored_dir, is_source_extension, SIBLING_EXTENSIONS};
use crate::util::relative_slash_path;
use crate::workspace::{Workspace, CONTEXT_ARTIFACT};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_MAX_RELATED_FILES: usize = 20;
pub const DEFAULT_RELATED_HOPS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub max_related_files: usize,
    pub related_hops: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_related_files: DEFAULT_MAX_RELATED_FILES,
            related_hops: DEFAULT_RELATED_HOPS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    options: ContextOptions,
}

impl ContextBuilder {
    pub fn new(options: ContextOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Build the context for `diff` against the checkout at `repo_root`.
    ///
    /// When a workspace is given the context is also persisted as an
    /// artifact; a failed write is logged, not returned.
    pub fn build(
        &self,
        diff: &[DiffEntry],
        repo_root: &Path,
        workspace: Option<&Workspace>,
    ) -> AssayResult<AssessmentContext> {
        for entry in diff {
            entry.validate()?;
        }
        if !repo_root.is_dir() {
            return Err(AssayError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("repository root {} is not a directory", repo_root.display()),
            )));
        }

        let skip_dir = workspace.map(|ws| ws.root().to_path_buf());
        let mut sources = read_sources(repo_root, &enumerate_sources(repo_root, skip_dir.as_deref()));
        debug!(files = sources.len(), "enumerated source files");

        let edited = resolve_edited(diff, repo_root, &mut sources);
        let removed: HashSet<String> = diff
            .iter()
            .filter(|d| d.is_removed())
            .map(|d| normalize_slashes(&d.path))
            .collect();

        let graph = ImportGraph::build(&sources);
        let mut related = graph.expand(
            &edited,
            self.options.related_hops,
            self.options.max_related_files,
        );

        let endpoints = endpoint_files(&sources);
        if !endpoints.is_empty() && calls_any_route(&edited, &related, &sources) {
            for endpoint in endpoints {
                if !related.contains(&endpoint) {
                    debug!(file = %endpoint, "adding endpoint file");
                    related.push(endpoint);
                }
            }
        }

        let related_files: Vec<SourceFile> = related
            .into_iter()
            .filter(|path| !removed.contains(path))
            .filter_map(|path| {
                let content = sources.get(&path)?.clone();
                Some(to_source_file(&path, content))
            })
            .collect();

        let manifest = read_manifest(repo_root);
        let tech_profile = infer_profile(manifest.as_ref(), sources.keys().map(String::as_str));

        let context = AssessmentContext {
            diff_entries: diff.to_vec(),
            related_files,
            tech_profile,
        };

        info!(
            edited = edited.len(),
            related = context.related_files.len(),
            edges = graph.edge_count(),
            "built assessment context"
        );

        if let Some(ws) = workspace {
            if let Err(e) = ws.persist_artifact(CONTEXT_ARTIFACT, &context) {
                warn!(error = %e, "failed to persist context artifact");
            }
        }

        Ok(context)
    }
}

fn to_source_file(path: &str, content: String) -> SourceFile {
    let file = SourceFile::new(path, content);
    let lang = file
        .extension()
        .and_then(|ext| scan::language_for_extension(&ext));
    match lang {
        Some(lang) => file.with_language(lang),
        None => file,
    }
}

/// Repo-relative paths of recognized source files outside ignored dirs.
pub fn enumerate_sources(repo_root: &Path, skip_dir: Option<&Path>) -> Vec<String> {
    let mut paths: Vec<String> = WalkDir::new(repo_root)
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            if skip_dir.is_some_and(|skip| e.path() == skip) {
                return false;
            }
            !(e.file_type().is_dir() && is_ignored_dir(&e.file_name().to_string_lossy()))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| is_source_extension(&x.to_ascii_lowercase()))
        })
        .filter_map(|e| relative_slash_path(repo_root, e.path()))
        .collect();
    paths.sort();
    paths
}

/// Read files in parallel. Unreadable or non-UTF-8 files are skipped.
fn read_sources(repo_root: &Path, paths: &[String]) -> BTreeMap<String, String> {
    paths
        .par_iter()
        .filter_map(|rel| match fs::read_to_string(repo_root.join(rel)) {
            Ok(content) => Some((rel.clone(), content)),
            Err(e) => {
                debug!(file = %rel, error = %e, "skipping unreadable file");
                None
            }
        })
        .collect()
}

/// Map non-removed diff paths onto files that exist on disk, probing sibling
/// extensions when the literal path is gone. Edited files outside the
/// enumerated set are read and added to `sources`.
fn resolve_edited(
    diff: &[DiffEntry],
    repo_root: &Path,
    sources: &mut BTreeMap<String, String>,
) -> Vec<String> {
    let mut edited: Vec<String> = Vec::new();
    for entry in diff.iter().filter(|d| !d.is_removed()) {
        let path = normalize_slashes(&entry.path);
        let Some(found) = locate(repo_root, &path) else {
            warn!(file = %path, "diff path not found in checkout; skipping");
            continue;
        };
        if edited.contains(&found) {
            continue;
        }
        if !sources.contains_key(&found) {
            match fs::read_to_string(repo_root.join(&found)) {
                Ok(content) => {
                    sources.insert(found.clone(), content);
                }
                Err(e) => {
                    warn!(file = %found, error = %e, "edited file unreadable; skipping");
                    continue;
                }
            }
        }
        edited.push(found);
    }
    edited
}

fn locate(repo_root: &Path, path: &str) -> Option<String> {
    if repo_root.join(path).is_file() {
        return Some(path.to_string());
    }
    let stem = strip_extension(path);
    SIBLING_EXTENSIONS
        .iter()
        .map(|ext| format!("{}.{}", stem, ext))
        .find(|candidate| repo_root.join(candidate).is_file())
}

fn endpoint_files(sources: &BTreeMap<String, String>) -> Vec<String> {
    sources
        .iter()
        .filter(|(_, content)| !scan::route_literals(content).is_empty())
        .map(|(path, _)| path.clone())
        .collect()
}

fn calls_any_route(
    edited: &[String],
    related: &[String],
    sources: &BTreeMap<String, String>,
) -> bool {
    edited
        .iter()
        .chain(related.iter())
        .filter_map(|path| sources.get(path))
        .any(|content| !scan::route_calls(content).is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiffStatus;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(ctx: &AssessmentContext) -> Vec<&str> {
        ctx.related_files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_two_edited_files_with_import_edge() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "src/file1.ts", "import x from './file2';\nconsole.log(x);");
        write(root, "src/file2.ts", "export default 1;");
        write(root, "src/unrelated.ts", "export const z = 3;");
        write(
            root,
            "package.json",
            r#"{"dependencies":{"express":"^4","lodash":"^4"},"devDependencies":{"jest":"^29"}}"#,
        );

        let diff = vec![
            DiffEntry::new("src/file1.ts", DiffStatus::Modified),
            DiffEntry::new("src/file2.ts", DiffStatus::Added),
        ];
        let ctx = ContextBuilder::default().build(&diff, root, None).unwrap();

        assert_eq!(paths(&ctx), vec!["src/file1.ts", "src/file2.ts"]);
        assert!(ctx.tech_profile.frameworks.contains("express"));
        assert!(ctx.tech_profile.libraries.contains("lodash"));
        assert!(ctx.tech_profile.languages.contains("TypeScript"));
        assert_eq!(ctx.related_files[0].language.as_deref(), Some("TypeScript"));
    }

    #[test]
    fn test_renamed_extension_is_probed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/widget.tsx", "export function Widget() {}");
        let diff = vec![DiffEntry::new("src/widget.jsx", DiffStatus::Renamed)];
        let ctx = ContextBuilder::default().build(&diff, dir.path(), None).unwrap();
        assert_eq!(paths(&ctx), vec!["src/widget.tsx"]);
    }

    #[test]
    fn test_removed_entries_never_become_related() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.ts", "import './gone';");
        write(dir.path(), "gone.ts", "");
        let diff = vec![
            DiffEntry::new("a.ts", DiffStatus::Modified),
            DiffEntry::new("gone.ts", DiffStatus::Removed),
        ];
        let ctx = ContextBuilder::default().build(&diff, dir.path(), None).unwrap();
        assert_eq!(paths(&ctx), vec!["a.ts"]);
    }

    #[test]
    fn test_empty_diff_still_profiles_repo() {
        let dir = tempdir().unwrap();
        write(dir.path(), "index.js", "module.exports = {};");
        let ctx = ContextBuilder::default().build(&[], dir.path(), None).unwrap();
        assert!(ctx.related_files.is_empty());
        assert!(ctx.tech_profile.languages.contains("JavaScript"));
        assert!(ctx.tech_profile.frameworks.is_empty());
    }

    #[test]
    fn test_ignored_dirs_are_skipped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.ts", "import { x } from './node_modules/x';");
        write(dir.path(), "node_modules/x.ts", "export const x = 1;");
        let sources = enumerate_sources(dir.path(), None);
        assert_eq!(sources, vec!["a.ts"]);
    }

    #[test]
    fn test_endpoint_files_join_when_caller_present() {
        let dir = tempdir().unwrap();
        write(dir.path(), "pages/list.js", "fetch('/api/items').then(r => r.json());");
        write(dir.path(), "server/items.js", "router.get('/api/items', handler);");
        write(dir.path(), "server/other.js", "app.post('/api/other', handler);");
        let diff = vec![DiffEntry::new("pages/list.js", DiffStatus::Modified)];
        let ctx = ContextBuilder::default().build(&diff, dir.path(), None).unwrap();
        assert_eq!(
            paths(&ctx),
            vec!["pages/list.js", "server/items.js", "server/other.js"]
        );
    }

    #[test]
    fn test_endpoints_not_added_without_caller() {
        let dir = tempdir().unwrap();
        write(dir.path(), "lib/a.js", "export function a() {}");
        write(dir.path(), "server/items.js", "router.get('/api/items', handler);");
        let diff = vec![DiffEntry::new("lib/a.js", DiffStatus::Modified)];
        let ctx = ContextBuilder::default().build(&diff, dir.path(), None).unwrap();
        assert_eq!(paths(&ctx), vec!["lib/a.js"]);
    }

    #[test]
    fn test_cap_bounds_graph_expansion() {
        let dir = tempdir().unwrap();
        write(dir.path(), "hub.ts", "");
        for i in 0..5 {
            write(dir.path(), &format!("leaf{i}.ts"), "import './hub';");
        }
        let diff = vec![DiffEntry::new("hub.ts", DiffStatus::Modified)];
        let builder = ContextBuilder::new(ContextOptions {
            max_related_files: 3,
            related_hops: 1,
        });
        let ctx = builder.build(&diff, dir.path(), None).unwrap();
        assert_eq!(paths(&ctx), vec!["hub.ts", "leaf0.ts", "leaf1.ts"]);
    }

    #[test]
    fn test_invalid_diff_entry_is_rejected() {
        let dir = tempdir().unwrap();
        let diff = vec![DiffEntry::new("../escape.ts", DiffStatus::Modified)];
        let err = ContextBuilder::default()
            .build(&diff, dir.path(), None)
            .unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_context_is_persisted_to_workspace() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.ts", "");
        let ws = Workspace::for_repo(dir.path(), ".assay");
        let diff = vec![DiffEntry::new("a.ts", DiffStatus::Added)];
        ContextBuilder::default()
            .build(&diff, dir.path(), Some(&ws))
            .unwrap();
        let saved: AssessmentContext =
            serde_json::from_str(&ws.load_artifact(CONTEXT_ARTIFACT).unwrap()).unwrap();
        assert_eq!(saved.related_files.len(), 1);
        assert_eq!(enumerate_sources(dir.path(), Some(ws.root())), vec!["a.ts"]);
    }
}
