//! assay - pull-request assessment from the command line
//!
//! Builds a dependency-aware context for a change, synthesizes and runs
//! tests against it in a sandbox, and scores it against weighted rubrics.

use anyhow::{Context, Result};
use assay_adapters::git_ops::{acquire_repo, checkout_pull_request, origin_slug, GIT_TIMEOUT_SECS};
use assay_adapters::{parse_pr_link, Config, DiffSource, GitHubDiffSource, RubricStorage, RubricStore};
use assay_core::context::{enumerate_sources, ContextBuilder};
use assay_core::{parse_criteria, parse_diff_entries, parse_style_sheet, DiffEntry, Generate, SourceFile};
use assay_engine::{derive_style_sheet, AssessmentRequest, Assessor, HarnessCommand, ModelClient, SandboxRunner};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Files sampled from a repository when deriving its style sheet.
const STYLE_SAMPLE_LIMIT: usize = 60;
const DEFAULT_LOG_DIRECTIVE: &str = "assay=info";
const FALLBACK_STORE_DIR: &str = ".assay-store";

#[derive(Parser, Debug)]
#[command(
    name = "assay",
    about = "Assess a pull request with synthesized tests and rubric scoring",
    version
)]
struct Cli {
    /// Where style sheets and reports are stored
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full assessment and write the report
    Assess(AssessArgs),
    /// Derive a style sheet from a repository and store it
    Train(TrainArgs),
    /// Print the assessment context for a diff
    Context(ContextArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Skip the generative model; every stage uses its deterministic fallback
    #[arg(long)]
    no_model: bool,
}

#[derive(Args, Debug)]
struct AssessArgs {
    /// Pull request URL (https://github.com/<owner>/<repo>/pull/<n>)
    #[arg(long, conflicts_with_all = ["repo", "diff"])]
    pr: Option<String>,

    /// Local checkout to assess
    #[arg(long, requires = "diff")]
    repo: Option<PathBuf>,

    /// JSON array of diff entries for --repo
    #[arg(long)]
    diff: Option<PathBuf>,

    /// JSON array of weighted criteria
    #[arg(long)]
    criteria: Option<PathBuf>,

    /// Style sheet JSON; defaults to the stored one for the repository
    #[arg(long)]
    style_sheet: Option<PathBuf>,

    /// Where pull requests are cloned
    #[arg(long, default_value = ".assay-checkouts")]
    checkouts: PathBuf,

    /// Storage key for a local repository (defaults to its GitHub origin,
    /// then its directory name)
    #[arg(long)]
    name: Option<String>,

    /// Write the report here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    /// Keep nothing on disk beyond the sandbox
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Repository to learn from
    #[arg(default_value = ".")]
    repo: PathBuf,

    /// Storage key (defaults to the GitHub origin, then the directory name)
    #[arg(long)]
    name: Option<String>,

    /// Also write the style sheet here
    #[arg(long)]
    out: Option<PathBuf>,

    /// Derive without storing
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ContextArgs {
    /// Repository checkout
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// JSON array of diff entries
    #[arg(long)]
    diff: PathBuf,

    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = Config::load();
    let store = store_root(cli.store);

    match cli.command {
        Command::Assess(args) => assess(&config, &store, args).await,
        Command::Train(args) => train(&config, &store, args).await,
        Command::Context(args) => context(&config, args).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn model_client(config: &Config, args: &ModelArgs) -> Result<Option<Arc<dyn Generate>>> {
    if args.no_model {
        return Ok(None);
    }
    let Some(key) = Config::model_api_key() else {
        warn!("no model API key in the environment; using fallbacks");
        return Ok(None);
    };
    let client = ModelClient::new(&config.api_url, key, &config.model, config.model_timeout())?;
    info!(model = client.model(), "using generative model");
    Ok(Some(Arc::new(client)))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn canonical_repo(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("Repository {} not found", path.display()))
}

fn store_root(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(Config::store_dir)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_STORE_DIR))
}

/// Storage key for a repository: `--name`, else the `owner/repo` of its
/// GitHub origin (what `--pr` assessments use), else the directory name.
fn storage_key(repo_root: &Path, name: Option<String>) -> String {
    name.or_else(|| origin_slug(repo_root)).unwrap_or_else(|| {
        repo_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repo".to_string())
    })
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("  Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

struct Target {
    repo_root: PathBuf,
    diff: Vec<DiffEntry>,
    repo: String,
    candidate: String,
}

async fn resolve_target(args: &AssessArgs) -> Result<Target> {
    if let Some(link) = &args.pr {
        let pr = parse_pr_link(link)?;
        let source = GitHubDiffSource::new(Config::github_token())?;
        let diff = source.fetch_diff(&pr).await?;

        let dest = args.checkouts.join(format!("{}-{}", pr.owner, pr.repo));
        let clone_url = pr.clone_url();
        let number = pr.number;
        let repo_root = tokio::task::spawn_blocking(move || -> Result<PathBuf> {
            let timeout = Duration::from_secs(GIT_TIMEOUT_SECS);
            let root = acquire_repo(&clone_url, &dest, timeout)?;
            checkout_pull_request(&root, number, timeout)?;
            Ok(root)
        })
        .await??;

        return Ok(Target {
            repo_root,
            diff,
            repo: pr.slug(),
            candidate: format!("pr-{}", pr.number),
        });
    }

    let (Some(repo), Some(diff_path)) = (&args.repo, &args.diff) else {
        anyhow::bail!("Pass either --pr <url> or --repo <path> --diff <file>");
    };
    let repo_root = canonical_repo(repo)?;
    let diff = parse_diff_entries(&read_file(diff_path)?)?;
    let candidate = diff_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local".to_string());
    Ok(Target {
        repo: storage_key(&repo_root, args.name.clone()),
        repo_root,
        diff,
        candidate,
    })
}

async fn assess(config: &Config, store_root: &Path, args: AssessArgs) -> Result<()> {
    let target = resolve_target(&args).await?;
    let criteria = match &args.criteria {
        Some(path) => parse_criteria(&read_file(path)?)?,
        None => Vec::new(),
    };
    let style_sheet = match &args.style_sheet {
        Some(path) => Some(parse_style_sheet(&read_file(path)?)?),
        None => None,
    };

    let runner = SandboxRunner::new(HarnessCommand {
        program: config.harness_program.clone(),
        args: config.harness_args.clone(),
        timeout: config.harness_timeout(),
    });
    let store = RubricStore::new(store_root);
    let mut assessor = Assessor::new(ContextBuilder::new(config.context_options()), runner)
        .with_storage(Arc::new(store))
        .with_workdir(&config.workdir_name, &config.sandbox_dir_name)
        .with_test_weight(config.test_weight)
        .dry_run(args.dry_run);
    if let Some(model) = model_client(config, &args.model)? {
        assessor = assessor.with_generator(model);
    }

    let request = AssessmentRequest {
        repo_root: target.repo_root,
        diff: target.diff,
        criteria,
        style_sheet,
        repo: target.repo,
        candidate: target.candidate,
    };
    let assessment = assessor.assess(&request).await?;
    if let Some(overall) = &assessment.report.overall {
        eprintln!("  Overall: {:.2}", overall.weighted_score);
        for note in &overall.notes {
            eprintln!("    - {}", note);
        }
    }
    emit(&assessment.report, args.out.as_deref())
}

fn sample_sources(repo_root: &Path, skip_dir: &Path) -> Vec<SourceFile> {
    enumerate_sources(repo_root, Some(skip_dir))
        .into_iter()
        .take(STYLE_SAMPLE_LIMIT)
        .filter_map(|rel| {
            let content = fs::read_to_string(repo_root.join(&rel)).ok()?;
            Some(SourceFile::new(rel, content))
        })
        .collect()
}

async fn train(config: &Config, store_root: &Path, args: TrainArgs) -> Result<()> {
    let repo_root = canonical_repo(&args.repo)?;
    let workdir = repo_root.join(&config.workdir_name);
    let files = {
        let root = repo_root.clone();
        let skip = workdir.clone();
        tokio::task::spawn_blocking(move || sample_sources(&root, &skip)).await?
    };
    if files.is_empty() {
        warn!(repo = %repo_root.display(), "no source files found");
    }

    let model = model_client(config, &args.model)?;
    let sheet = derive_style_sheet(&files, model.as_deref()).await;

    let key = storage_key(&repo_root, args.name);
    if !args.dry_run {
        RubricStore::new(store_root).save_style_sheet(&key, &sheet)?;
        eprintln!("  Stored style sheet for {}", key);
    }
    match args.out {
        Some(out) => emit(&sheet, Some(&out)),
        None if args.dry_run => emit(&sheet, None),
        None => Ok(()),
    }
}

async fn context(config: &Config, args: ContextArgs) -> Result<()> {
    let repo_root = canonical_repo(&args.repo)?;
    let diff = parse_diff_entries(&read_file(&args.diff)?)?;
    let builder = ContextBuilder::new(config.context_options());
    let ctx = tokio::task::spawn_blocking(move || builder.build(&diff, &repo_root, None)).await??;
    emit(&ctx, args.out.as_deref())
}
