//! Stage orchestration for one assessment.
//!
//! Context → synthesize → run → repair (once, only on failures) → re-run →
//! both scorers concurrently → compose.

use crate::repair::remove_failing_tests;
use crate::report::{compose_report, ReportInputs};
use crate::sandbox::SandboxRunner;
use crate::score::{score_criteria, Rubric};
use crate::style::style_criteria;
use crate::synth::{import_base, synthesize_tests, SynthOptions, Synthesis};
use assay_adapters::RubricStorage;
use assay_core::context::ContextBuilder;
use assay_core::{
    AssayError, AssayResult, AssessmentContext, AssessmentReport, Criterion, DiffEntry, Generate,
    StyleSheet, Workspace,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_TEST_WEIGHT: f64 = 10.0;

/// One assessment's inputs.
#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    pub repo_root: PathBuf,
    pub diff: Vec<DiffEntry>,
    pub criteria: Vec<Criterion>,
    /// Style sheet to score against; loaded from storage when absent.
    pub style_sheet: Option<StyleSheet>,
    /// Storage key for the repository, e.g. `owner/repo`.
    pub repo: String,
    /// Storage key for the change under assessment.
    pub candidate: String,
}

/// Everything one run produced, for callers that want more than the report.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub context: AssessmentContext,
    pub synthesis: Synthesis,
    pub report: AssessmentReport,
}

pub struct Assessor {
    context: ContextBuilder,
    runner: SandboxRunner,
    generator: Option<Arc<dyn Generate>>,
    storage: Option<Arc<dyn RubricStorage>>,
    workdir_name: String,
    sandbox_dir_name: String,
    test_weight: f64,
    dry_run: bool,
}

impl Assessor {
    pub fn new(context: ContextBuilder, runner: SandboxRunner) -> Self {
        Self {
            context,
            runner,
            generator: None,
            storage: None,
            workdir_name: assay_core::workspace::DEFAULT_WORKDIR_NAME.to_string(),
            sandbox_dir_name: assay_core::workspace::DEFAULT_SANDBOX_DIR_NAME.to_string(),
            test_weight: DEFAULT_TEST_WEIGHT,
            dry_run: false,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generate>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn RubricStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_workdir(mut self, workdir_name: impl Into<String>, sandbox_dir_name: impl Into<String>) -> Self {
        self.workdir_name = workdir_name.into();
        self.sandbox_dir_name = sandbox_dir_name.into();
        self
    }

    pub fn with_test_weight(mut self, weight: f64) -> Self {
        self.test_weight = weight;
        self
    }

    /// In dry mode synthesized tests are not kept under the workspace and
    /// the report is not persisted. The sandbox still runs.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn workspace_for(&self, repo_root: &Path) -> Workspace {
        Workspace::for_repo(repo_root, &self.workdir_name).with_sandbox_dir_name(&self.sandbox_dir_name)
    }

    fn generator(&self) -> Option<&dyn Generate> {
        self.generator.as_deref()
    }

    /// Build the context off the async runtime.
    pub async fn build_context(
        &self,
        diff: &[DiffEntry],
        repo_root: &Path,
        workspace: &Workspace,
    ) -> AssayResult<AssessmentContext> {
        let builder = self.context.clone();
        let diff = diff.to_vec();
        let root = repo_root.to_path_buf();
        let ws = workspace.clone();
        tokio::task::spawn_blocking(move || builder.build(&diff, &root, Some(&ws)))
            .await
            .map_err(|e| AssayError::Io(std::io::Error::other(e.to_string())))?
    }

    fn resolve_style_sheet(&self, request: &AssessmentRequest) -> Option<StyleSheet> {
        if let Some(sheet) = &request.style_sheet {
            return Some(sheet.clone());
        }
        let storage = self.storage.as_ref()?;
        match storage.load_style_sheet(&request.repo) {
            Ok(sheet) => sheet,
            Err(err) => {
                warn!(repo = %request.repo, error = %err, "failed to load style sheet");
                None
            }
        }
    }

    /// Run every stage for `request`.
    ///
    /// Fails only on input errors and sandbox write failures; model and
    /// harness trouble is folded into the report.
    pub async fn assess(&self, request: &AssessmentRequest) -> AssayResult<Assessment> {
        let ws = self.workspace_for(&request.repo_root);
        let sandbox = ws.sandbox_dir();

        let context = self.build_context(&request.diff, &request.repo_root, &ws).await?;

        // Repaired files are written where they will be read back: the
        // workspace normally, the throwaway sandbox in dry mode.
        let test_dir = if self.dry_run { sandbox.clone() } else { ws.tests_dir() };
        let options = SynthOptions {
            dry_run: self.dry_run,
            test_dir: test_dir.clone(),
            import_base: import_base(&request.repo_root, &sandbox),
        };
        let synthesis = synthesize_tests(&context, self.generator(), &options).await?;

        let mut tests = self
            .runner
            .run(&synthesis.proposed_tests, &request.repo_root, &sandbox)
            .await?;
        let mut pruned_tests = 0;
        if tests.has_failures() && !tests.is_harness_error() {
            let repaired = remove_failing_tests(&synthesis.proposed_tests, &tests, &test_dir);
            let rerun = self.runner.run(&repaired, &request.repo_root, &sandbox).await?;
            pruned_tests = tests.failed.saturating_sub(rerun.failed);
            info!(pruned_tests, remaining = rerun.failed, "re-ran repaired tests");
            tests = rerun;
        }

        let style_sheet = self.resolve_style_sheet(request);
        let style = style_sheet.as_ref().map(style_criteria).unwrap_or_default();
        let user_scoring = score_criteria(&context, &request.criteria, Rubric::User, self.generator());
        let style_scoring = async {
            match &style_sheet {
                Some(sheet) => score_criteria(&context, &style, Rubric::Style(sheet), self.generator()).await,
                None => Vec::new(),
            }
        };
        let (user_scores, style_scores) = futures::join!(user_scoring, style_scoring);

        let report = compose_report(
            ReportInputs {
                user_scores,
                style_scores,
                tests,
                pruned_tests,
            },
            self.test_weight,
        );

        if !self.dry_run {
            if let Some(storage) = &self.storage {
                match storage.save_report(&request.repo, &request.candidate, &report) {
                    Ok(stored) => info!(id = %stored.id, "stored report"),
                    Err(err) => warn!(error = %err, "failed to store report"),
                }
            }
        }

        Ok(Assessment {
            context,
            synthesis,
            report,
        })
    }
}
