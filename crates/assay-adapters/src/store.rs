//! Rubric storage
//!
//! Persists derived style sheets and composed reports as JSON under a
//! storage root. Writes take an exclusive file lock and go through a
//! temp-file rename so readers never observe a half-written document.

use anyhow::Context;
use assay_core::util::write_atomic;
use assay_core::{AssessmentReport, StyleSheet};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

const STYLE_SHEETS_DIR: &str = "style-sheets";
const REPORTS_DIR: &str = "reports";
const LOCK_FILE: &str = ".lock";
const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

/// A report as stored, keyed by repository and candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReport {
    pub id: Uuid,
    pub repo: String,
    pub candidate: String,
    pub created_at: DateTime<Utc>,
    pub report: AssessmentReport,
}

/// Supplies a previously derived style sheet and persists final reports.
pub trait RubricStorage: Send + Sync {
    fn load_style_sheet(&self, repo: &str) -> anyhow::Result<Option<StyleSheet>>;
    fn save_style_sheet(&self, repo: &str, sheet: &StyleSheet) -> anyhow::Result<()>;
    fn save_report(
        &self,
        repo: &str,
        candidate: &str,
        report: &AssessmentReport,
    ) -> anyhow::Result<StoredReport>;
}

pub struct RubricStore {
    root: PathBuf,
}

struct StoreLock {
    file: fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl RubricStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn style_sheet_path(&self, repo: &str) -> PathBuf {
        self.root
            .join(STYLE_SHEETS_DIR)
            .join(format!("{}.json", sanitize_component(repo)))
    }

    fn report_path(&self, repo: &str, candidate: &str) -> PathBuf {
        self.root
            .join(REPORTS_DIR)
            .join(sanitize_component(repo))
            .join(format!("{}.json", sanitize_component(candidate)))
    }

    fn lock(&self, exclusive: bool) -> anyhow::Result<StoreLock> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create store root {}", self.root.display()))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;

        let start = Instant::now();
        loop {
            let result = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match result {
                Ok(()) => break,
                Err(err) => {
                    if err.kind() != ErrorKind::WouldBlock {
                        return Err(err.into());
                    }
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(anyhow::anyhow!(
                            "Timed out waiting for store lock ({}s)",
                            LOCK_TIMEOUT_SECS
                        ));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
            }
        }

        Ok(StoreLock { file })
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _lock = self.lock(true)?;
        let content = serde_json::to_string_pretty(value)?;
        write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "stored document");
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> anyhow::Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let _lock = self.lock(false)?;
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    pub fn load_report(&self, repo: &str, candidate: &str) -> anyhow::Result<Option<StoredReport>> {
        self.read_json(&self.report_path(repo, candidate))
    }
}

impl RubricStorage for RubricStore {
    fn load_style_sheet(&self, repo: &str) -> anyhow::Result<Option<StyleSheet>> {
        self.read_json(&self.style_sheet_path(repo))
    }

    fn save_style_sheet(&self, repo: &str, sheet: &StyleSheet) -> anyhow::Result<()> {
        self.write_json(&self.style_sheet_path(repo), sheet)
    }

    fn save_report(
        &self,
        repo: &str,
        candidate: &str,
        report: &AssessmentReport,
    ) -> anyhow::Result<StoredReport> {
        let stored = StoredReport {
            id: Uuid::new_v4(),
            repo: repo.to_string(),
            candidate: candidate.to_string(),
            created_at: Utc::now(),
            report: report.clone(),
        };
        self.write_json(&self.report_path(repo, candidate), &stored)?;
        Ok(stored)
    }
}

/// File-name-safe form of a storage key (`owner/repo` -> `owner__repo`).
fn sanitize_component(input: &str) -> String {
    let cleaned = input
        .replace('/', "__")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect::<String>();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
