//! Repository acquisition: clone, fast-forward, or re-clone.

use crate::github::parse_remote_url;
use assay_core::util::{run_command_with_timeout, truncate, CommandRunResult};
use assay_core::{AssayError, AssayResult};
use git2::Repository;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

pub const GIT_TIMEOUT_SECS: u64 = 300;

fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<CommandRunResult, String> {
    let mut cmd = Command::new("git");
    cmd.current_dir(dir)
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASKPASS", "true");
    run_command_with_timeout(&mut cmd, timeout)
}

fn check(result: Result<CommandRunResult, String>, what: &str) -> Result<(), String> {
    let result = result?;
    if result.timed_out {
        return Err(format!("git {} timed out", what));
    }
    if !result.success() {
        return Err(format!(
            "git {} failed: {}",
            what,
            truncate(result.stderr.trim(), 300)
        ));
    }
    Ok(())
}

/// Two remote URLs name the same repository.
fn same_remote(a: &str, b: &str) -> bool {
    let norm = |s: &str| s.trim().trim_end_matches('/').trim_end_matches(".git").to_string();
    if norm(a) == norm(b) {
        return true;
    }
    match (parse_remote_url(a), parse_remote_url(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn origin_url(dest: &Path) -> Option<String> {
    let repo = Repository::open(dest).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(str::to_string)
}

/// `owner/repo` of a GitHub `origin`, the same key `PrLink::slug` yields.
pub fn origin_slug(repo_root: &Path) -> Option<String> {
    let (owner, repo) = parse_remote_url(&origin_url(repo_root)?)?;
    Some(format!("{}/{}", owner, repo))
}

fn fast_forward(dest: &Path, timeout: Duration) -> Result<(), String> {
    check(run_git(dest, &["fetch", "--quiet", "origin"], timeout), "fetch")?;
    check(
        run_git(dest, &["merge", "--ff-only", "--quiet", "@{u}"], timeout),
        "fast-forward",
    )
}

fn clone_fresh(clone_url: &str, dest: &Path, timeout: Duration) -> Result<(), String> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
    let dest_str = dest.to_string_lossy().into_owned();
    check(
        run_git(parent, &["clone", "--quiet", clone_url, &dest_str], timeout),
        "clone",
    )
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(false)
}

/// Materialize `clone_url` at `dest` and return the canonical root.
///
/// An existing checkout of the same origin is fast-forwarded; on divergence
/// or any failure it is removed and cloned fresh. A non-empty directory that
/// is not a repository is never deleted.
pub fn acquire_repo(clone_url: &str, dest: &Path, timeout: Duration) -> AssayResult<PathBuf> {
    if dest.exists() {
        match origin_url(dest) {
            Some(url) if same_remote(&url, clone_url) => match fast_forward(dest, timeout) {
                Ok(()) => {
                    info!(dest = %dest.display(), "updated existing checkout");
                    return canonical(dest);
                }
                Err(e) => {
                    warn!(dest = %dest.display(), error = %e, "fast-forward failed; recloning");
                    fs::remove_dir_all(dest).map_err(|e| {
                        AssayError::RepoAcquisition(format!("Failed to remove stale checkout: {}", e))
                    })?;
                }
            },
            Some(_) => {
                warn!(dest = %dest.display(), "checkout has a different origin; recloning");
                fs::remove_dir_all(dest).map_err(|e| {
                    AssayError::RepoAcquisition(format!("Failed to remove stale checkout: {}", e))
                })?;
            }
            None if is_empty_dir(dest) => {
                let _ = fs::remove_dir(dest);
            }
            None => {
                return Err(AssayError::RepoAcquisition(format!(
                    "{} exists and is not a git repository",
                    dest.display()
                )));
            }
        }
    }

    clone_fresh(clone_url, dest, timeout).map_err(AssayError::RepoAcquisition)?;
    info!(dest = %dest.display(), "cloned repository");
    canonical(dest)
}

/// Fetch a pull request's head into a local branch and check it out.
pub fn checkout_pull_request(repo_root: &Path, number: u64, timeout: Duration) -> AssayResult<String> {
    let branch = format!("assay-pr-{}", number);
    let refspec = format!("pull/{}/head:{}", number, branch);
    check(
        run_git(repo_root, &["fetch", "--quiet", "--force", "origin", &refspec], timeout),
        "fetch pull request",
    )
    .map_err(AssayError::RepoAcquisition)?;
    check(
        run_git(repo_root, &["checkout", "--quiet", &branch], timeout),
        "checkout",
    )
    .map_err(AssayError::RepoAcquisition)?;
    Ok(branch)
}

fn canonical(dest: &Path) -> AssayResult<PathBuf> {
    dest.canonicalize()
        .map_err(|e| AssayError::RepoAcquisition(format!("Failed to resolve {}: {}", dest.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::tempdir;

    fn commit_file(repo: &Repository, name: &str, content: &str, message: &str) {
        let root = repo.workdir().unwrap().to_path_buf();
        fs::write(root.join(name), content).unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("assay", "assay@example.com").unwrap();
        let parents: Vec<git2::Commit> = repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
    }

    #[test]
    fn test_origin_slug_matches_pr_slug() {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(origin_slug(dir.path()), None);

        repo.remote("origin", "git@github.com:acme/math.git").unwrap();
        let pr = crate::github::parse_pr_link("https://github.com/acme/math/pull/7").unwrap();
        assert_eq!(origin_slug(dir.path()), Some(pr.slug()));
    }

    #[test]
    fn test_same_remote_normalizes() {
        assert!(same_remote(
            "https://github.com/o/r.git",
            "git@github.com:o/r.git"
        ));
        assert!(same_remote("/tmp/origin/", "/tmp/origin"));
        assert!(!same_remote("https://github.com/o/r", "https://github.com/o/other"));
    }

    #[test]
    fn acquire_repo_clones_then_fast_forwards() {
        let dir = tempdir().unwrap();
        let origin_path = dir.path().join("origin");
        let origin = Repository::init(&origin_path).unwrap();
        commit_file(&origin, "a.txt", "one", "first");

        let url = origin_path.to_string_lossy().into_owned();
        let dest = dir.path().join("checkout");
        let timeout = Duration::from_secs(60);

        let root = acquire_repo(&url, &dest, timeout).unwrap();
        assert_eq!(fs::read_to_string(root.join("a.txt")).unwrap(), "one");

        commit_file(&origin, "b.txt", "two", "second");
        let root = acquire_repo(&url, &dest, timeout).unwrap();
        assert_eq!(fs::read_to_string(root.join("b.txt")).unwrap(), "two");
    }

    #[test]
    fn acquire_repo_refuses_to_delete_foreign_directory() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("not-a-repo");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "precious").unwrap();

        let err = acquire_repo("/nonexistent/origin", &dest, Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, AssayError::RepoAcquisition(_)));
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn acquire_repo_reports_clone_failure() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("checkout");
        let missing = dir.path().join("missing-origin");
        let err = acquire_repo(&missing.to_string_lossy(), &dest, Duration::from_secs(30))
            .unwrap_err();
        assert!(matches!(err, AssayError::RepoAcquisition(_)));
    }
}
