//! CLI for the GitHub-to-Discourse issue migrator.
//!
//! `dry` previews a run (classification and stats only), `migrate` executes
//! it with checkpointing, and `resume` finishes issues a previous run left
//! in flight. All three walk repositories one at a time, strictly
//! sequentially.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use issue_migrator::checkpoint::CheckpointLog;
use issue_migrator::config::{self, MigratorConfig, load_config};
use issue_migrator::discourse::DiscourseClient;
use issue_migrator::github::{GithubClient, IssueTracker};
use issue_migrator::issue::RepoRef;
use issue_migrator::logging;
use issue_migrator::resume::{ResumeController, restore_log};
use issue_migrator::run::{DryRun, LiveRun, RunMode, RunOptions, RunStats};
use issue_migrator::sequencer::SequencerSettings;
use issue_migrator::steplib;

#[derive(Parser)]
#[command(
    name = "issue-migrator",
    version,
    about = "Migrate open GitHub issues to Discourse topics"
)]
struct Cli {
    /// Path to the migrator config file.
    #[arg(long, global = true, default_value = "migrator.toml")]
    config: PathBuf,

    /// Override the configured checkpoint log path.
    #[arg(long, global = true)]
    checkpoint_log: Option<PathBuf>,

    /// Override the configured delay between issues.
    #[arg(long, global = true)]
    delay_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify issues and report stats without any side effect.
    Dry(RepoArgs),
    /// Migrate open issues: Discourse topic, comment, close, lock.
    Migrate(MigrateArgs),
    /// Finish in-flight issues recorded in the checkpoint log.
    Resume(ResumeArgs),
}

#[derive(Args)]
struct RepoArgs {
    /// Use the authenticated account's repositories instead of the steplib.
    #[arg(long)]
    own_repos: bool,

    /// Override the configured processed-count limit.
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Args)]
struct MigrateArgs {
    #[command(flatten)]
    repos: RepoArgs,

    /// Bake an identifier into created topic titles for test isolation.
    #[arg(long)]
    run_id: Option<String>,
}

#[derive(Args)]
struct ResumeArgs {
    /// Override the configured processed-count limit.
    #[arg(long)]
    limit: Option<u32>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(&cli.config)?;
    if let Some(path) = &cli.checkpoint_log {
        cfg.checkpoint_log = path.clone();
    }
    if let Some(delay_ms) = cli.delay_ms {
        cfg.delay_ms = delay_ms;
    }

    match cli.command {
        Command::Dry(args) => cmd_dry(&cfg, &args),
        Command::Migrate(args) => cmd_migrate(&cfg, &args),
        Command::Resume(args) => cmd_resume(&cfg, &args),
    }
}

fn cmd_dry(cfg: &MigratorConfig, args: &RepoArgs) -> Result<()> {
    let tracker = GithubClient::new(&config::github_token()?)?;
    let repos = gather_repos(cfg, &tracker, args.own_repos)?;

    let mut mode = DryRun::new(run_options(cfg, args.limit));
    let result = walk_repositories(&tracker, &repos, &mut mode);
    report_stats(&mode.stats());
    result
}

fn cmd_migrate(cfg: &MigratorConfig, args: &MigrateArgs) -> Result<()> {
    let tracker = GithubClient::new(&config::github_token()?)?;
    let forum = DiscourseClient::new(&cfg.discourse, config::discourse_credentials()?)?;
    let repos = gather_repos(cfg, &tracker, args.repos.own_repos)?;

    let log = CheckpointLog::open(&cfg.checkpoint_log)?;
    let mut mode = LiveRun::new(
        &tracker,
        &forum,
        log,
        settings(cfg, args.run_id.clone()),
        run_options(cfg, args.repos.limit),
    );
    let result = walk_repositories(&tracker, &repos, &mut mode);
    report_stats(&mode.stats());
    result
}

fn cmd_resume(cfg: &MigratorConfig, args: &ResumeArgs) -> Result<()> {
    let tracker = GithubClient::new(&config::github_token()?)?;
    let forum = DiscourseClient::new(&cfg.discourse, config::discourse_credentials()?)?;

    let contents = fs::read_to_string(&cfg.checkpoint_log)
        .with_context(|| format!("read checkpoint log {}", cfg.checkpoint_log.display()))?;
    let restored = restore_log(&contents);
    info!(count = restored.len(), "restored in-flight issues from checkpoint log");

    let log = CheckpointLog::open(&cfg.checkpoint_log)?;
    let mut controller = ResumeController::new(
        &tracker,
        &forum,
        log,
        settings(cfg, None),
        run_options(cfg, args.limit),
    );
    let result = controller.resume(&restored);
    report_stats(&controller.stats());
    result
}

/// Repository list for a fresh run: the steplib spec by default, or the
/// authenticated account's own repositories.
fn gather_repos(
    cfg: &MigratorConfig,
    tracker: &GithubClient,
    own_repos: bool,
) -> Result<Vec<RepoRef>> {
    let repos = if own_repos {
        tracker.list_repositories()?
    } else {
        steplib::load_repos(&cfg.steplib_url, &cfg.orgs)?
    };
    info!(count = repos.len(), "found repositories, querying open issues");
    Ok(repos)
}

/// Feed each repository's open issues into the run mode, one repository at
/// a time. A failing issue listing skips that repository; a failing run
/// halts the whole batch.
fn walk_repositories<T: IssueTracker, M: RunMode>(
    tracker: &T,
    repos: &[RepoRef],
    mode: &mut M,
) -> Result<()> {
    let total = repos.len();
    for (idx, repo) in repos.iter().enumerate() {
        info!(repo = %repo.slug(), index = idx + 1, total, "processing repository");
        let issues = match tracker.list_open_issues(repo) {
            Ok(issues) => issues,
            Err(err) => {
                warn!(repo = %repo.slug(), error = %format!("{err:#}"), "skipping repository: list issues failed");
                continue;
            }
        };
        mode.run(&issues)?;
    }
    Ok(())
}

fn run_options(cfg: &MigratorConfig, limit: Option<u32>) -> RunOptions {
    RunOptions {
        limit: limit.or(cfg.limit),
        delay: Duration::from_millis(cfg.delay_ms),
        now: Utc::now(),
    }
}

fn settings(cfg: &MigratorConfig, run_id: Option<String>) -> SequencerSettings {
    SequencerSettings {
        run_id,
        category: cfg.discourse.category,
        category_url: cfg.discourse.category_url.clone(),
    }
}

fn report_stats(stats: &RunStats) {
    println!("finished processing issues");
    println!(
        "stale: {} active: {} processed: {}",
        stats.stale, stats.active, stats.processed
    );
    println!("pull requests: {}", stats.pull_request);
}
