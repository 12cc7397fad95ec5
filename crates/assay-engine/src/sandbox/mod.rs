//! Sandbox Test Runner
//!
//! Materializes synthesized tests plus a slice of project configuration in
//! an isolated directory, runs the harness there, and normalizes its JSON
//! report. The sandbox is exclusive to one run and cleared before writing.

mod harness;
mod report;

pub use harness::{ProjectShape, UiFramework};
pub use report::parse_jest_report;

use anyhow::Context;
use assay_core::context::read_manifest;
use assay_core::util::{join_within, run_command_with_timeout, truncate};
use assay_core::{AssayError, AssayResult, SourceFile, TestOutcome};
use harness::{BABEL_CONFIG_FILE, BABEL_CONFIG_NAMES, JEST_CONFIG_FILE, RESULTS_FILE, SETUP_FILE};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Files copied from the repository so the harness sees the same
/// dependency versions and compiler options as production code.
pub const CONFIG_ALLOWLIST: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "jsconfig.json",
    "babel.config.js",
    ".babelrc",
    "next.config.js",
    "next.config.mjs",
];

#[derive(Debug, Clone)]
pub struct HarnessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for HarnessCommand {
    fn default() -> Self {
        Self {
            program: "npx".to_string(),
            args: vec!["--no-install".to_string(), "jest".to_string()],
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxRunner {
    harness: HarnessCommand,
}

fn write_error(path: &Path, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> AssayError {
    AssayError::sandbox_write(path, io::Error::new(io::ErrorKind::Other, err))
}

/// Write every test at its relative path under `sandbox`, creating
/// parents. Returns the absolute paths written.
pub fn materialize(tests: &[SourceFile], sandbox: &Path) -> AssayResult<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(tests.len());
    for test in tests {
        let path = join_within(sandbox, &test.path).map_err(|e| write_error(sandbox, e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| AssayError::sandbox_write(parent, e))?;
        }
        fs::write(&path, test.content.as_bytes()).map_err(|e| AssayError::sandbox_write(&path, e))?;
        written.push(path);
    }
    Ok(written)
}

/// Clear a stale sandbox and recreate it empty.
fn reset_dir(sandbox: &Path) -> AssayResult<()> {
    if sandbox.exists() {
        fs::remove_dir_all(sandbox).map_err(|e| AssayError::sandbox_write(sandbox, e))?;
    }
    fs::create_dir_all(sandbox).map_err(|e| AssayError::sandbox_write(sandbox, e))
}

fn copy_allowlisted_config(repo_root: &Path, sandbox: &Path) -> AssayResult<Vec<&'static str>> {
    let mut copied = Vec::new();
    for name in CONFIG_ALLOWLIST {
        let source = repo_root.join(name);
        if !source.is_file() {
            continue;
        }
        let dest = sandbox.join(name);
        fs::copy(&source, &dest).map_err(|e| AssayError::sandbox_write(&dest, e))?;
        copied.push(*name);
    }
    Ok(copied)
}

/// Delete any `node_modules` below the sandbox root so a single
/// resolution tree (sandbox first, then ancestors) is used.
fn remove_nested_dependency_dirs(sandbox: &Path) -> AssayResult<usize> {
    let nested: Vec<PathBuf> = WalkDir::new(sandbox)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_type().is_dir())
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() == "node_modules" && e.depth() > 1)
        .map(|e| e.into_path())
        .collect();
    let mut removed = 0;
    for dir in nested {
        if !dir.exists() {
            continue;
        }
        fs::remove_dir_all(&dir).map_err(|e| AssayError::sandbox_write(&dir, e))?;
        removed += 1;
    }
    Ok(removed)
}

fn write_json(path: &Path, value: &serde_json::Value) -> AssayResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).map_err(|e| AssayError::sandbox_write(path, e))
}

impl SandboxRunner {
    pub fn new(harness: HarnessCommand) -> Self {
        Self { harness }
    }

    /// Lay out the sandbox: tests, copied config, harness config and, for
    /// markup tests, the setup script. Returns the harness config path.
    pub fn prepare(
        &self,
        tests: &[SourceFile],
        repo_root: &Path,
        sandbox: &Path,
    ) -> AssayResult<PathBuf> {
        let manifest = read_manifest(repo_root);
        let shape = ProjectShape::detect(tests, manifest.as_ref());
        debug!(?shape, "detected project shape");

        reset_dir(sandbox)?;
        materialize(tests, sandbox)?;
        let copied = copy_allowlisted_config(repo_root, sandbox)?;

        let babel_path = match BABEL_CONFIG_NAMES.iter().find(|name| copied.contains(name)) {
            Some(existing) => sandbox.join(existing),
            None => {
                let path = sandbox.join(BABEL_CONFIG_FILE);
                write_json(&path, &harness::babel_config(&shape))?;
                path
            }
        };

        if shape.markup {
            let setup = sandbox.join(SETUP_FILE);
            fs::write(&setup, harness::setup_script(&shape))
                .map_err(|e| AssayError::sandbox_write(&setup, e))?;
        }

        let config_path = sandbox.join(JEST_CONFIG_FILE);
        write_json(&config_path, &harness::jest_config(sandbox, &shape, &babel_path))?;

        let removed = remove_nested_dependency_dirs(sandbox)?;
        if removed > 0 {
            debug!(removed, "removed nested dependency directories");
        }
        Ok(config_path)
    }

    /// Run `tests` in `sandbox` with config inherited from `repo_root`.
    ///
    /// Sandbox write failures are fatal. Anything the harness does wrong
    /// (crash, timeout, missing report) becomes a harness-error outcome.
    pub async fn run(
        &self,
        tests: &[SourceFile],
        repo_root: &Path,
        sandbox: &Path,
    ) -> AssayResult<TestOutcome> {
        if tests.is_empty() {
            reset_dir(sandbox)?;
            return Ok(TestOutcome::empty());
        }

        let config_path = self.prepare(tests, repo_root, sandbox)?;
        let harness = self.harness.clone();
        let sandbox_dir = sandbox.to_path_buf();
        let joined =
            tokio::task::spawn_blocking(move || invoke_harness(&harness, &sandbox_dir, &config_path))
                .await;

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(error = %err, "test harness failed");
                TestOutcome::harness_error(format!("{:#}", err))
            }
            Err(err) => {
                warn!(error = %err, "test harness task panicked");
                TestOutcome::harness_error(err.to_string())
            }
        };
        info!(
            total = outcome.total,
            passed = outcome.passed,
            failed = outcome.failed,
            "sandbox run finished"
        );
        Ok(outcome)
    }
}

fn invoke_harness(
    harness: &HarnessCommand,
    sandbox: &Path,
    config_path: &Path,
) -> anyhow::Result<TestOutcome> {
    let results_path = sandbox.join(RESULTS_FILE);
    let mut cmd = Command::new(&harness.program);
    cmd.current_dir(sandbox)
        .args(&harness.args)
        .arg("--json")
        .arg(format!("--outputFile={}", results_path.display()))
        .arg("--config")
        .arg(config_path)
        .arg("--rootDir")
        .arg(sandbox)
        .env("CI", "true");

    let result = run_command_with_timeout(&mut cmd, harness.timeout)
        .map_err(|e| anyhow::anyhow!("{}: {}", harness.program, e))?;
    if result.timed_out {
        anyhow::bail!("test harness timed out after {}s", harness.timeout.as_secs());
    }

    // A failing test exits non-zero too; only a missing report is an error.
    let json = fs::read_to_string(&results_path).with_context(|| {
        format!(
            "harness produced no report (exit {:?}): {}",
            result.status.and_then(|s| s.code()),
            truncate(result.stderr.trim(), 500)
        )
    })?;
    let mut outcome = parse_jest_report(&json).context("unreadable harness report")?;
    if outcome.duration_ms.is_none() {
        outcome.duration_ms = Some(result.elapsed.as_millis() as u64);
    }
    Ok(outcome)
}
