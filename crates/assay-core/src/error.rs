//! Error taxonomy shared by the pipeline stages.
//!
//! Only input and fatal errors are represented here. Degraded-mode outcomes
//! (missing model, unparsable reply, harness crash) are ordinary values and
//! never reach this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssayError {
    /// A diff entry that cannot be accepted as-is
    #[error("Invalid diff entry '{path}': {reason}")]
    InvalidDiffEntry { path: String, reason: String },

    /// A pull-request link that does not name a GitHub pull request
    #[error("Invalid pull request link '{0}'")]
    InvalidPrLink(String),

    /// A rubric (criteria list or style sheet) that cannot be parsed
    #[error("Invalid rubric: {0}")]
    InvalidRubric(String),

    /// The repository could not be cloned or updated
    #[error("Failed to acquire repository: {0}")]
    RepoAcquisition(String),

    /// The sandbox or test directory could not be written
    #[error("Failed to write sandbox '{path}': {source}")]
    SandboxWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AssayResult<T> = Result<T, AssayError>;

impl AssayError {
    pub fn invalid_diff(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDiffEntry {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_pr_link(link: impl Into<String>) -> Self {
        Self::InvalidPrLink(link.into())
    }

    pub fn invalid_rubric(msg: impl Into<String>) -> Self {
        Self::InvalidRubric(msg.into())
    }

    pub fn sandbox_write(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::SandboxWrite {
            path: path.display().to_string(),
            source,
        }
    }

    /// Input errors are rejected at a stage boundary; everything else is fatal.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            AssayError::InvalidDiffEntry { .. }
                | AssayError::InvalidPrLink(_)
                | AssayError::InvalidRubric(_)
        )
    }
}
