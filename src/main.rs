//! # codejson-harvester CLI (`harvest`)
//!
//! The `harvest` binary scans configured targets into intermediate
//! snapshots and merges them into the final `code.json` catalog.
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest scan` | Scan targets and write intermediate snapshots |
//! | `harvest merge` | Merge snapshots into the catalog and side-files |
//! | `harvest run` | `scan` followed by `merge` |
//! | `harvest plan --repos N` | Show the delay plan for a target of N repositories |
//! | `harvest sources` | List connectors, their health and the configured targets |
//! | `harvest stats` | Summarize snapshots on disk |
//! | `harvest completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Scan one target with a small worker pool
//! harvest scan --target gitlab:cdc/ncird --workers 2
//!
//! # Try a full run on the first 100 repositories
//! harvest run --limit 100
//!
//! # What would pacing look like for 4,000 repos, 300 touched recently?
//! harvest plan --repos 4000 --recent 300
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use codejson_harvester::analyzer::RuleAnalyzer;
use codejson_harvester::cache::FileSnapshotStore;
use codejson_harvester::config::{self, Config};
use codejson_harvester::logging;
use codejson_harvester::merge;
use codejson_harvester::progress::{ProgressMode, ScanProgressReporter};
use codejson_harvester::runner::{self, ScanOverrides, ScanSummary};
use codejson_harvester::sources;
use codejson_harvester::stats;
use codejson_harvester::traits::{Analyzer, ConnectorRegistry};
use codejson_harvester_core::delay::DelayPlan;
use codejson_harvester_core::models::{Platform, ScanTarget};
use codejson_harvester_core::retry::RetryPolicy;

/// codejson-harvester: an adaptive, cache-aware repository inventory
/// harvester.
///
/// All commands except `completions` read a TOML configuration file given
/// by `--config`. See `config/harvest.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Adaptive, cache-aware harvester for code.json repository inventories",
    version,
    long_about = "Lists repositories on GitHub, GitLab and Azure DevOps targets through \
    connectors, reuses cached records whose last commit is unchanged, fetches the rest \
    under adaptive pacing and bounded retry, and merges per-target snapshots into one \
    deduplicated code.json catalog."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/harvest.toml`.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Also write logs to this file (overrides `[logging] file`).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Debug-level logging when `RUST_LOG` is not set.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Progress output on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `scan` and `run`.
#[derive(clap::Args, Clone, Debug, Default)]
struct ScanArgs {
    /// Only scan this target (`<platform>:<name>`). Repeatable.
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Worker limit per target (overrides `harvest.workers`).
    #[arg(long)]
    workers: Option<usize>,

    /// Global cap on repositories processed across all targets
    /// (overrides `harvest.item_cap`).
    #[arg(long)]
    limit: Option<usize>,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Scan targets into intermediate snapshots.
    ///
    /// Each target is listed, filtered, and processed with at most
    /// `workers` repositories in flight. Unchanged repositories are copied
    /// from the previous snapshot without any remote call. Exits with
    /// status 1 if any target aborted.
    Scan(ScanArgs),

    /// Merge all intermediate snapshots into the catalog.
    ///
    /// Deduplicates by repository identity (newest scan wins), writes the
    /// catalog atomically and updates the private-ID map and exemption log
    /// after backing up their previous versions.
    Merge,

    /// Scan, then merge.
    ///
    /// The merge still runs when some targets aborted, so their previous
    /// snapshots are carried into the catalog. The exit status is 1 in
    /// that case.
    Run(ScanArgs),

    /// Show the delay plan for a hypothetical target.
    Plan {
        /// Number of repositories after filtering.
        #[arg(long)]
        repos: usize,

        /// Repositories created or pushed since the date filter.
        /// Implies a date filter is active.
        #[arg(long)]
        recent: Option<usize>,
    },

    /// List connectors, their health, and the configured targets.
    Sources,

    /// Summarize snapshots on disk and fingerprint the catalog.
    Stats,

    /// Print shell completions to stdout.
    Completions {
        /// Shell to generate completions for.
        shell: clap_complete::Shell,
    },
}

/// Normalize a `--target` value to the `platform:name` label form.
fn parse_target_label(raw: &str) -> Result<String> {
    let (platform, name) = raw
        .split_once(':')
        .with_context(|| format!("Invalid target '{}': expected <platform>:<name>", raw))?;
    let platform = Platform::from_str(platform)?;
    Ok(ScanTarget::new(platform, name).label())
}

fn overrides(args: &ScanArgs) -> Result<ScanOverrides> {
    Ok(ScanOverrides {
        workers: args.workers,
        limit: args.limit,
        targets: args
            .targets
            .iter()
            .map(|t| parse_target_label(t))
            .collect::<Result<_>>()?,
    })
}

async fn scan(cfg: &Config, args: &ScanArgs, progress: Arc<dyn ScanProgressReporter>) -> Result<ScanSummary> {
    let registry = ConnectorRegistry::from_config(cfg)?;
    let analyzer: Option<Arc<dyn Analyzer>> = if cfg.analysis.enabled {
        Some(Arc::new(RuleAnalyzer::new(&cfg.analysis)))
    } else {
        None
    };
    let store = Arc::new(FileSnapshotStore::new(&cfg.output.dir));
    let summary =
        runner::run_scan(cfg, &registry, analyzer, store, &overrides(args)?, progress).await?;
    runner::print_summary(&summary);
    Ok(summary)
}

fn print_plan(cfg: &Config, repos: usize, recent: Option<usize>) {
    let plan = DelayPlan::compute(&cfg.delay, &cfg.adaptive_delay, repos, recent);
    let retry = RetryPolicy::new(cfg.retry.clone());

    println!("plan");
    println!("  repositories: {}", plan.item_count);
    println!("  effective count: {}", plan.effective_count);
    println!("  per-call delay: {:.3}s", plan.per_call.as_secs_f64());
    if cfg.adaptive_delay.enabled {
        println!("  inter-item delay: {:.3}s", plan.inter_item.as_secs_f64());
    } else {
        println!("  inter-item delay: off (adaptive_delay.enabled = false)");
    }
    let schedule: Vec<String> = retry
        .schedule()
        .iter()
        .map(|d| format!("{:.0}s", d.as_secs_f64()))
        .collect();
    println!(
        "  retry: {} tries, backoff [{}]",
        retry.max_attempts(),
        schedule.join(", ")
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "harvest", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let log_file = cli.log_file.clone().or_else(|| cfg.logging.file.clone());
    let guard = logging::init_logging(log_file.as_deref(), cli.verbose)?;
    let progress: Arc<dyn ScanProgressReporter> = Arc::from(
        cli.progress
            .unwrap_or_else(ProgressMode::default_for_tty)
            .reporter(),
    );

    let mut aborted = false;
    match cli.command {
        Commands::Scan(args) => {
            aborted = scan(&cfg, &args, progress).await?.has_failures();
        }
        Commands::Merge => {
            let store = FileSnapshotStore::new(&cfg.output.dir);
            let report = merge::run_merge(&cfg.output, &store).await?;
            merge::print_report(&report);
        }
        Commands::Run(args) => {
            aborted = scan(&cfg, &args, progress).await?.has_failures();
            let store = FileSnapshotStore::new(&cfg.output.dir);
            let report = merge::run_merge(&cfg.output, &store).await?;
            merge::print_report(&report);
        }
        Commands::Plan { repos, recent } => {
            print_plan(&cfg, repos, recent);
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    drop(guard);
    if aborted {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_labels_are_normalized() {
        assert_eq!(parse_target_label("GitHub:CDCgov").unwrap(), "github:CDCgov");
        assert_eq!(
            parse_target_label("azuredevops:cdc/ncezid").unwrap(),
            "azure:cdc/ncezid"
        );
        assert!(parse_target_label("CDCgov").is_err());
        assert!(parse_target_label("bitbucket:x").is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
