//! Assessment engine: test synthesis, sandboxed execution, repair, rubric
//! scoring and report composition, plus the model client they share.

pub mod llm;
pub mod pipeline;
pub mod repair;
pub mod report;
pub mod sandbox;
pub mod score;
pub mod style;
pub mod synth;

pub use llm::ModelClient;
pub use pipeline::{Assessment, AssessmentRequest, Assessor};
pub use repair::remove_failing_tests;
pub use report::{compose_report, ReportInputs};
pub use sandbox::{HarnessCommand, SandboxRunner};
pub use score::{score_criteria, Rubric};
pub use style::{derive_style_sheet, style_criteria};
pub use synth::{synthesize_tests, SynthOptions, Synthesis};
