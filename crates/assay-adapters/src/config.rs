//! Configuration management for assay
//!
//! Stores settings in ~/.config/assay/config.json. Secrets never live here;
//! they come from the environment.

use assay_core::context::ContextOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
pub const DEFAULT_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MODEL_KEY_VARS: &[&str] = &["ASSAY_API_KEY", "OPENROUTER_API_KEY", "GEMINI_API_KEY"];
const GITHUB_TOKEN_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_related_files: usize,
    pub related_hops: usize,
    pub model: String,
    pub api_url: String,
    pub model_timeout_secs: u64,
    pub harness_program: String,
    pub harness_args: Vec<String>,
    pub harness_timeout_secs: u64,
    pub sandbox_dir_name: String,
    pub workdir_name: String,
    /// Weight of the test pass rate when blending the overall score.
    pub test_weight: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_related_files: assay_core::context::DEFAULT_MAX_RELATED_FILES,
            related_hops: assay_core::context::DEFAULT_RELATED_HOPS,
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            model_timeout_secs: 120,
            harness_program: "npx".to_string(),
            harness_args: vec!["--no-install".to_string(), "jest".to_string()],
            harness_timeout_secs: 600,
            sandbox_dir_name: assay_core::workspace::DEFAULT_SANDBOX_DIR_NAME.to_string(),
            workdir_name: assay_core::workspace::DEFAULT_WORKDIR_NAME.to_string(),
            test_weight: 10.0,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        let defaults = Config::default();
        if self.max_related_files == 0 {
            self.max_related_files = defaults.max_related_files;
        }
        if self.model.trim().is_empty() {
            self.model = defaults.model;
        }
        if self.api_url.trim().is_empty() {
            self.api_url = defaults.api_url;
        }
        if self.model_timeout_secs == 0 {
            self.model_timeout_secs = defaults.model_timeout_secs;
        }
        if self.harness_program.trim().is_empty() {
            self.harness_program = defaults.harness_program;
            self.harness_args = defaults.harness_args;
        }
        if self.harness_timeout_secs == 0 {
            self.harness_timeout_secs = defaults.harness_timeout_secs;
        }
        if !is_plain_dir_name(&self.sandbox_dir_name) {
            self.sandbox_dir_name = defaults.sandbox_dir_name;
        }
        if !is_plain_dir_name(&self.workdir_name) {
            self.workdir_name = defaults.workdir_name;
        }
        if !self.test_weight.is_finite() || self.test_weight < 0.0 {
            self.test_weight = defaults.test_weight;
        }
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("assay"))
    }

    /// Default root for stored style sheets and reports, outside any
    /// checkout so re-cloning never removes them.
    pub fn store_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("assay"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path. A corrupt file is set aside as
    /// `config.json.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str::<Config>(&content) {
                Ok(mut config) => {
                    config.sanitize();
                    return config;
                }
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let path =
            Self::config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(&sanitized)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        write_config_atomic(path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_related_files: self.max_related_files,
            related_hops: self.related_hops,
        }
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn harness_timeout(&self) -> Duration {
        Duration::from_secs(self.harness_timeout_secs)
    }

    /// Model API key from the first non-empty environment variable.
    pub fn model_api_key() -> Option<String> {
        MODEL_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    pub fn github_token() -> Option<String> {
        std::env::var(GITHUB_TOKEN_VAR)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/assay/config.json".to_string())
    }
}

fn is_plain_dir_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains('/') && !name.contains('\\') && name != "." && name != ".."
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
