//! # Repo Sieve CLI (`sieve`)
//!
//! The `sieve` binary runs either side of the crawl pipeline, plus a couple
//! of helpers for resuming it.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sieve collect` | Search every term and write one batch file per term |
//! | `sieve scan` | Clone and inspect the repositories in each batch, in order |
//! | `sieve status` | Summarize batches, processed URLs, and hits |
//! | `sieve terms` | List the search terms with their positions |
//!
//! ## Examples
//!
//! ```bash
//! # Start collecting from scratch
//! sieve collect --token $GITHUB_TOKEN --out ./urlstash
//!
//! # Resume collecting at a given term and batch number
//! sieve collect --out ./urlstash --starting-point django --file-batch-index 10
//!
//! # Scan batches as they appear, starting at batch 1
//! sieve scan --dir ./urlstash
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Duration;

use repo_sieve::acquire::GitAcquirer;
use repo_sieve::batch::BatchStore;
use repo_sieve::clock::SystemClock;
use repo_sieve::config::{self, Config};
use repo_sieve::consumer::{AcquireAndFilterConsumer, ConsumerSettings, ScanLedgers};
use repo_sieve::github::GitHubClient;
use repo_sieve::inspect::ContentPredicate;
use repo_sieve::ledger::{HitLog, ProcessedSet};
use repo_sieve::models::ResumeCursor;
use repo_sieve::producer::{ProducerSettings, SearchProducer};
use repo_sieve::progress::ProgressMode;
use repo_sieve::status;

/// Grace period before collecting into a non-empty output directory.
const NON_EMPTY_OUT_GRACE: Duration = Duration::from_secs(5);

/// Repo Sieve: collect repositories from code search and keep the ones
/// whose contents match.
#[derive(Parser)]
#[command(
    name = "sieve",
    about = "Repo Sieve: collect repositories from code search and filter them by content",
    version,
    long_about = "Repo Sieve runs a two-process pipeline: `collect` pages through repository \
    search for a list of terms and writes one batch file per term; `scan` waits for each batch, \
    clones every repository in it, and logs the files of those that contain both configured markers."
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply if it does not exist.
    #[arg(long, global = true, default_value = "./sieve.toml")]
    config: PathBuf,

    /// Progress output on stderr.
    #[arg(long, global = true, value_enum, default_value = "auto")]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search each term and write its results as a numbered batch file.
    ///
    /// Terms before `--starting-point` are skipped; the first batch written
    /// gets number `--file-batch-index`. Both values are logged after every
    /// term so an interrupted run can be resumed.
    Collect {
        /// Minimum number of stars.
        #[arg(long)]
        min_stars: Option<u32>,

        /// Maximum number of stars.
        #[arg(long)]
        max_stars: Option<u32>,

        /// Programming language to filter on.
        #[arg(long)]
        language: Option<String>,

        /// GitHub auth token.
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: String,

        /// Number of the first batch file to write.
        #[arg(long, default_value_t = 1)]
        file_batch_index: u64,

        /// Term to start at (earlier terms are skipped).
        #[arg(long)]
        starting_point: Option<String>,

        /// Output directory for batch files.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Clone and inspect the repositories of each batch file, in order.
    ///
    /// Waits for each batch to be marked complete, so it can run alongside
    /// `collect`. Runs until interrupted unless `--max-batches` is given.
    Scan {
        /// Number of the first batch file to process.
        #[arg(long, default_value_t = 1)]
        file_batch_index: u64,

        /// Directory containing the batch files.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Stop after this many batches.
        #[arg(long)]
        max_batches: Option<u64>,
    },

    /// Summarize batch files, processed URLs, and hits.
    Status {
        /// Directory containing the batch files.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// List the configured search terms with their positions.
    Terms {
        /// Mark where a run started at this term would begin.
        #[arg(long)]
        starting_point: Option<String>,
    },
}

fn init_logging() {
    let mut builder = pretty_env_logger::formatted_builder();
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    let reporter = cli.progress.reporter();

    match cli.command {
        Commands::Collect {
            min_stars,
            max_stars,
            language,
            token,
            file_batch_index,
            starting_point,
            out,
        } => {
            if let Some(v) = min_stars {
                cfg.search.min_stars = v;
            }
            if let Some(v) = max_stars {
                cfg.search.max_stars = v;
            }
            if let Some(v) = language {
                cfg.search.language = v;
            }
            if let Some(v) = out {
                cfg.batches.dir = v;
            }
            cfg.validate()?;

            let cursor = ResumeCursor::resolve(
                &cfg.search.terms,
                starting_point.as_deref(),
                file_batch_index,
            )
            .with_context(|| {
                format!(
                    "Unknown starting point '{}'. Run `sieve terms` to list terms.",
                    starting_point.as_deref().unwrap_or_default()
                )
            })?;

            prepare_output_dir(&cfg).await?;

            let client = GitHubClient::new(
                &cfg.search.api_url,
                &token,
                cfg.search.request_timeout_secs,
            )?;
            let login = client.check_authentication().await?;
            println!("Authentication successful. Welcome, {}!", login);

            let store = BatchStore::new(&cfg.batches.dir);
            let clock = SystemClock;
            let producer = SearchProducer::new(
                &client,
                &store,
                &clock,
                reporter.as_ref(),
                ProducerSettings::from(&cfg.search),
            );
            let summary = producer.run(&cfg.search.terms, cursor).await?;

            println!("collect ok");
            println!("  terms searched: {}", summary.terms.len());
            println!("  records collected: {}", summary.records_collected);
            println!("  next batch index: {}", summary.next_batch_index);
        }
        Commands::Scan {
            file_batch_index,
            dir,
            max_batches,
        } => {
            if let Some(v) = dir {
                cfg.batches.dir = v;
            }
            cfg.validate()?;
            if !cfg.batches.dir.is_dir() {
                bail!(
                    "Directory path {} does not exist.",
                    cfg.batches.dir.display()
                );
            }

            let store = BatchStore::new(&cfg.batches.dir);
            let predicate = ContentPredicate::new(
                &cfg.scan.framework_marker,
                &cfg.scan.target_marker,
                &cfg.scan.exclude_globs,
            )?;
            let acquirer = GitAcquirer::new(
                cfg.scan.shallow_clone,
                Duration::from_secs(cfg.scan.acquire_timeout_secs),
            );
            let ledgers = ScanLedgers {
                processed: ProcessedSet::load(&cfg.scan.processed_log)?,
                hits: HitLog::new(&cfg.scan.hits_log),
            };

            let clock = SystemClock;
            let mut consumer = AcquireAndFilterConsumer::new(
                &store,
                &acquirer,
                &predicate,
                &clock,
                reporter.as_ref(),
                ledgers,
                ConsumerSettings::from(&cfg.scan),
            );
            let reports = consumer.run(file_batch_index, max_batches).await?;

            let retained: usize = reports.iter().map(|r| r.retained).sum();
            println!("scan ok");
            println!("  batches processed: {}", reports.len());
            println!("  repositories retained: {}", retained);
        }
        Commands::Status { dir } => {
            if let Some(v) = dir {
                cfg.batches.dir = v;
            }
            status::run_status(&cfg)?;
        }
        Commands::Terms { starting_point } => {
            let start = match starting_point.as_deref() {
                Some(term) => cfg
                    .search
                    .terms
                    .iter()
                    .position(|t| t == term)
                    .with_context(|| format!("Unknown starting point '{}'", term))?,
                None => 0,
            };
            for (i, term) in cfg.search.terms.iter().enumerate() {
                let marker = match i.cmp(&start) {
                    Ordering::Less => "skip",
                    Ordering::Equal if starting_point.is_some() => "start",
                    _ => "",
                };
                println!("{:>4}  {:<20} {}", i, term, marker);
            }
        }
    }

    Ok(())
}

/// Create the output directory, or give the operator a moment to abort when
/// it already holds files.
async fn prepare_output_dir(cfg: &Config) -> anyhow::Result<()> {
    let dir = &cfg.batches.dir;
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
        return Ok(());
    }

    let non_empty = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read output directory: {}", dir.display()))?
        .next()
        .is_some();
    if non_empty {
        log::warn!(
            "The output directory {} is not empty. You have {} seconds to abort.",
            dir.display(),
            NON_EMPTY_OUT_GRACE.as_secs()
        );
        tokio::time::sleep(NON_EMPTY_OUT_GRACE).await;
    }
    Ok(())
}
