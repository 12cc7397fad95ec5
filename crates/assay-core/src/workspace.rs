//! Working-directory handle passed into every stage.
//!
//! All on-disk side effects (context artifacts, synthesized tests, the
//! sandbox) live under one root so concurrent assessments with different
//! roots never collide.

use crate::util::write_atomic;
use anyhow::Context;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKDIR_NAME: &str = ".assay";
pub const DEFAULT_SANDBOX_DIR_NAME: &str = "__assay_tests__";
const ARTIFACTS_DIR: &str = "artifacts";
const TESTS_DIR: &str = "generated-tests";
pub const CONTEXT_ARTIFACT: &str = "context.json";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    sandbox_dir_name: String,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sandbox_dir_name: DEFAULT_SANDBOX_DIR_NAME.to_string(),
        }
    }

    /// Workspace nested inside a repository checkout (`<repo>/<workdir_name>`).
    pub fn for_repo(repo_root: &Path, workdir_name: &str) -> Self {
        Self::new(repo_root.join(workdir_name))
    }

    pub fn with_sandbox_dir_name(mut self, name: impl Into<String>) -> Self {
        self.sandbox_dir_name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join(ARTIFACTS_DIR)
    }

    /// Where synthesized tests are written when not in dry mode.
    pub fn tests_dir(&self) -> PathBuf {
        self.root.join(TESTS_DIR)
    }

    /// Exclusive to one run at a time; cleared before each run.
    pub fn sandbox_dir(&self) -> PathBuf {
        self.root.join(&self.sandbox_dir_name)
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.artifacts_dir().join(name)
    }

    /// Serialize `value` as pretty JSON into the artifacts directory.
    pub fn persist_artifact<T: Serialize>(&self, name: &str, value: &T) -> anyhow::Result<PathBuf> {
        let path = self.artifact_path(name);
        let content = serde_json::to_string_pretty(value)?;
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        Ok(path)
    }

    pub fn load_artifact(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.artifact_path(name)).ok()
    }
}
