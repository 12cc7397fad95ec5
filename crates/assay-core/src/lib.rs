//! Core domain model and contracts for Assay.
//!
//! Holds the data shared by every stage (diff entries, source files, the
//! assessment context, scores and test outcomes), the best-effort source
//! scanners, and the Context Builder.

pub mod context;
pub mod error;
pub mod generate;
pub mod model;
pub mod scan;
pub mod util;
pub mod workspace;

pub use error::{AssayError, AssayResult};
pub use generate::Generate;
pub use model::*;
pub use workspace::Workspace;
