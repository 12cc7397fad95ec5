//! Runtime adapters for assay: configuration, GitHub diff source,
//! repository acquisition, and rubric persistence.

pub mod config;
pub mod git_ops;
pub mod github;
pub mod store;

pub use config::Config;
pub use github::{parse_pr_link, DiffSource, GitHubDiffSource, PrLink};
pub use store::{RubricStorage, RubricStore, StoredReport};
