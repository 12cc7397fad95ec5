//! GitHub pull-request integration
//!
//! Parses PR links and fetches the changed-file list through the REST API,
//! following `Link` pagination.

use anyhow::{Context, Result};
use assay_core::{AssayError, AssayResult, DiffEntry, DiffStatus};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

const API_BASE: &str = "https://api.github.com";
const API_TIMEOUT_SECS: u64 = 30;
const PER_PAGE: usize = 100;
/// Hard stop for runaway pagination (GitHub caps PR files at 3000).
const MAX_PAGES: usize = 50;

/// Maximum length for error body content in error messages
const MAX_ERROR_BODY_LEN: usize = 200;

/// Sanitize an API error body to prevent credential leakage.
fn sanitize_error_body(body: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "token",
        "secret",
        "password",
        "credential",
        "bearer",
        "ghp_",
        "gho_",
        "ghu_",
        "github_pat_",
    ];

    let truncated = if body.chars().count() > MAX_ERROR_BODY_LEN {
        let head: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
        format!("{}... (truncated)", head)
    } else {
        body.to_string()
    };

    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(error details redacted - may contain sensitive data)".to_string();
    }

    truncated
}

// ============================================================================
// PR links
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrLink {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrLink {
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}/{}.git", self.owner, self.repo)
    }

    /// `owner/repo`, used as the storage key for reports.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Parse `http(s)://github.com/<owner>/<repo>/pull/<n>[/...]`.
pub fn parse_pr_link(link: &str) -> AssayResult<PrLink> {
    let trimmed = link.trim();
    let invalid = || AssayError::invalid_pr_link(trimmed);

    let parsed = url::Url::parse(trimmed).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if host != "github.com" && host != "www.github.com" {
        return Err(invalid());
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [owner, repo, "pull", number, ..] => {
            let number: u64 = number.parse().map_err(|_| invalid())?;
            if number == 0 {
                return Err(invalid());
            }
            Ok(PrLink {
                owner: owner.to_string(),
                repo: repo.trim_end_matches(".git").to_string(),
                number,
            })
        }
        _ => Err(invalid()),
    }
}

/// Parse the owner and repo from a GitHub remote URL.
///
/// Supports:
/// - git@github.com:owner/repo.git
/// - https://github.com/owner/repo.git
/// - https://github.com/owner/repo
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        let path = rest.trim_end_matches(".git");
        let parts: Vec<&str> = path.splitn(2, '/').collect();
        if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
            return Some((parts[0].to_string(), parts[1].to_string()));
        }
        return None;
    }

    let parsed = url::Url::parse(url).ok()?;
    if parsed.host_str()? != "github.com" {
        return None;
    }
    let path = parsed
        .path()
        .trim_start_matches('/')
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let parts: Vec<&str> = path.splitn(2, '/').collect();
    if parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty() {
        return Some((parts[0].to_string(), parts[1].to_string()));
    }
    None
}

// ============================================================================
// Diff source
// ============================================================================

/// Ordered changed-file list for one pull request.
pub trait DiffSource: Send + Sync {
    fn fetch_diff<'a>(
        &'a self,
        pr: &'a PrLink,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiffEntry>>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
    status: String,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    previous_filename: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
}

fn map_status(path: &str, status: &str) -> AssayResult<DiffStatus> {
    match status {
        "added" => Ok(DiffStatus::Added),
        "removed" => Ok(DiffStatus::Removed),
        "modified" | "copied" | "changed" | "unchanged" => Ok(DiffStatus::Modified),
        "renamed" => Ok(DiffStatus::Renamed),
        other => Err(AssayError::invalid_diff(
            path,
            format!("unknown status '{}'", other),
        )),
    }
}

fn map_file(file: PullFile) -> AssayResult<DiffEntry> {
    let status = map_status(&file.filename, &file.status)?;
    let entry = DiffEntry {
        path: file.filename,
        status,
        additions: file.additions,
        deletions: file.deletions,
        patch: file.patch,
        previous_path: file.previous_filename,
    };
    entry.validate()?;
    Ok(entry)
}

/// The `rel="next"` target of a `Link` header, if any.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

pub struct GitHubDiffSource {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
}

impl GitHubDiffSource {
    pub fn new(token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token,
            api_base: API_BASE.to_string(),
        })
    }

    /// Point at a GitHub Enterprise or mock API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn first_page_url(&self, pr: &PrLink) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/files?per_page={}",
            self.api_base, pr.owner, pr.repo, pr.number, PER_PAGE
        )
    }

    async fn fetch_all(&self, pr: &PrLink) -> Result<Vec<DiffEntry>> {
        let mut entries = Vec::new();
        let mut next = Some(self.first_page_url(pr));
        let mut pages = 0usize;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(anyhow::anyhow!(
                    "GitHub pagination exceeded {} pages",
                    MAX_PAGES
                ));
            }

            let mut request = self
                .client
                .get(&url)
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "assay")
                .header("X-GitHub-Api-Version", "2022-11-28");
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            let resp = request
                .send()
                .await
                .context("Failed to fetch pull request files")?;
            let status = resp.status();
            let link = resp
                .headers()
                .get("link")
                .and_then(|v| v.to_str().ok())
                .and_then(next_link);

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                    return Err(anyhow::anyhow!(
                        "GitHub API error ({}): {}",
                        status,
                        sanitize_error_body(&api_error.message)
                    ));
                }
                return Err(anyhow::anyhow!(
                    "GitHub API error ({}): {}",
                    status,
                    sanitize_error_body(&body)
                ));
            }

            let files: Vec<PullFile> = resp
                .json()
                .await
                .context("Failed to parse pull request files")?;
            debug!(page = pages, files = files.len(), "fetched diff page");
            for file in files {
                entries.push(map_file(file)?);
            }
            next = link;
        }

        info!(pr = pr.number, files = entries.len(), "fetched pull request diff");
        Ok(entries)
    }
}

impl DiffSource for GitHubDiffSource {
    fn fetch_diff<'a>(
        &'a self,
        pr: &'a PrLink,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DiffEntry>>> + Send + 'a>> {
        Box::pin(self.fetch_all(pr))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pr_link_basic() {
        let pr = parse_pr_link("https://github.com/octocat/hello-world/pull/42").unwrap();
        assert_eq!(pr.owner, "octocat");
        assert_eq!(pr.repo, "hello-world");
        assert_eq!(pr.number, 42);
        assert_eq!(pr.clone_url(), "https://github.com/octocat/hello-world.git");
        assert_eq!(pr.slug(), "octocat/hello-world");
    }

    #[test]
    fn test_parse_pr_link_with_trailing_segments() {
        let pr = parse_pr_link("  http://github.com/a/b/pull/7/files  ").unwrap();
        assert_eq!(pr.number, 7);
    }

    #[test]
    fn test_parse_pr_link_rejects_non_pr_urls() {
        for bad in [
            "https://github.com/a/b",
            "https://github.com/a/b/issues/3",
            "https://gitlab.com/a/b/pull/3",
            "https://github.com/a/b/pull/abc",
            "ftp://github.com/a/b/pull/3",
            "not a url",
        ] {
            let err = parse_pr_link(bad).unwrap_err();
            assert!(err.is_input_error(), "{bad}");
        }
    }

    #[test]
    fn test_parse_ssh_remote() {
        assert_eq!(
            parse_remote_url("git@github.com:owner/repo.git"),
            Some(("owner".to_string(), "repo".to_string()))
        );
    }

    #[test]
    fn test_parse_https_remote() {
        assert_eq!(
            parse_remote_url("https://github.com/owner/repo"),
            Some(("owner".to_string(), "repo".to_string()))
        );
        assert_eq!(parse_remote_url("https://gitlab.com/owner/repo"), None);
    }

    #[test]
    fn test_next_link_parsing() {
        let header = r#"<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=5>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/x?page=2")
        );
        let last_page = r#"<https://api.github.com/x?page=1>; rel="prev""#;
        assert_eq!(next_link(last_page), None);
    }

    #[test]
    fn test_map_file_normalizes_statuses() {
        let json = r#"[
            {"filename":"a.ts","status":"copied","additions":1,"deletions":0},
            {"filename":"b.ts","status":"renamed","additions":0,"deletions":0,"previous_filename":"b.js"},
            {"filename":"c.ts","status":"removed","additions":0,"deletions":4,"patch":"@@"}
        ]"#;
        let files: Vec<PullFile> = serde_json::from_str(json).unwrap();
        let entries: Vec<DiffEntry> = files.into_iter().map(|f| map_file(f).unwrap()).collect();
        assert_eq!(entries[0].status, DiffStatus::Modified);
        assert_eq!(entries[1].previous_path.as_deref(), Some("b.js"));
        assert_eq!(entries[2].status, DiffStatus::Removed);
        assert_eq!(entries[2].patch.as_deref(), Some("@@"));
    }

    #[test]
    fn test_map_file_rejects_unknown_status() {
        let file = PullFile {
            filename: "a.ts".to_string(),
            status: "teleported".to_string(),
            additions: 0,
            deletions: 0,
            patch: None,
            previous_filename: None,
        };
        let err = map_file(file).unwrap_err();
        assert!(matches!(err, AssayError::InvalidDiffEntry { .. }));
    }

    #[test]
    fn test_sanitize_error_body_redacts_secrets() {
        assert_eq!(sanitize_error_body("Not Found"), "Not Found");
        assert!(sanitize_error_body("bad token ghp_123").contains("redacted"));
        let long = "x".repeat(500);
        assert!(sanitize_error_body(&long).ends_with("(truncated)"));
    }

    async fn serve_pages(listener: tokio::net::TcpListener, requests: usize) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let base = format!("http://{}", listener.local_addr().unwrap());
        for _ in 0..requests {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let (body, link) = if request.contains("page=2") {
                (
                    r#"[{"filename":"src/b.ts","status":"added","additions":3,"deletions":0}]"#,
                    String::new(),
                )
            } else {
                (
                    r#"[{"filename":"src/a.ts","status":"modified","additions":1,"deletions":1}]"#,
                    format!("Link: <{}/next?page=2>; rel=\"next\"\r\n", base),
                )
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                link,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_fetch_diff_follows_pagination() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_pages(listener, 2));

        let source = GitHubDiffSource::new(Some("t".to_string()))
            .unwrap()
            .with_api_base(base);
        let pr = PrLink {
            owner: "o".to_string(),
            repo: "r".to_string(),
            number: 1,
        };
        let entries = source.fetch_diff(&pr).await.unwrap();
        server.await.unwrap();

        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.ts", "src/b.ts"]);
        assert_eq!(entries[1].status, DiffStatus::Added);
    }

    #[test]
    fn test_first_page_url() {
        let source = GitHubDiffSource::new(None)
            .unwrap()
            .with_api_base("http://localhost:9999/");
        let pr = PrLink {
            owner: "o".to_string(),
            repo: "r".to_string(),
            number: 5,
        };
        assert_eq!(
            source.first_page_url(&pr),
            "http://localhost:9999/repos/o/r/pulls/5/files?per_page=100"
        );
    }
}
