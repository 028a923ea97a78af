//! Acquire-and-filter consumer: drains batch files in order.
//!
//! The consumer waits for batch `n` to be marked ready, evaluates its
//! records one by one, then moves on to `n + 1`. It never deletes batches
//! and never terminates on its own unless given a batch limit.
//!
//! Per record:
//!
//! ```text
//! Unseen ──▶ Attempted ──▶ AcquireFailed
//!                     ├──▶ OversizeDiscarded
//!                     ├──▶ PredicateFailed
//!                     └──▶ Retained (url and paths appended to the hits log)
//! ```
//!
//! Only `Attempted` is durable: the URL goes into the processed log before
//! the clone starts, so a crash mid-clone never leads to retrying the same
//! repository forever. The scratch copy is deleted whatever the outcome.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquire::{discard, scratch_path, AcquireError, Acquirer};
use crate::batch::BatchStore;
use crate::clock::Clock;
use crate::config::ScanConfig;
use crate::inspect::{directory_size, ContentPredicate, Verdict};
use crate::ledger::{HitLog, ProcessedSet};
use crate::models::{RecordOutcome, RepositoryRecord};
use crate::progress::{CrawlProgressEvent, CrawlProgressReporter};

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_repo_size_bytes: u64,
    pub max_retained_per_batch: usize,
    pub request_delay: Duration,
    pub poll_interval: Duration,
    pub scratch_dir: PathBuf,
}

impl From<&ScanConfig> for ConsumerSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            max_repo_size_bytes: config.max_repo_size_bytes(),
            max_retained_per_batch: config.max_retained_per_batch,
            request_delay: Duration::from_millis(config.request_delay_ms),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            scratch_dir: config.scratch_dir.clone(),
        }
    }
}

/// The consumer's durable state.
pub struct ScanLedgers {
    pub processed: ProcessedSet,
    pub hits: HitLog,
}

/// Counts for one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub index: u64,
    pub total: usize,
    pub already_processed: usize,
    pub acquire_failed: usize,
    pub oversize: usize,
    pub predicate_failed: usize,
    pub retained: usize,
    /// Records left unevaluated because the retention cap was reached.
    pub deferred: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::AlreadyProcessed => self.already_processed += 1,
            RecordOutcome::AcquireFailed => self.acquire_failed += 1,
            RecordOutcome::OversizeDiscarded => self.oversize += 1,
            RecordOutcome::PredicateFailed => self.predicate_failed += 1,
            RecordOutcome::Retained(_) => self.retained += 1,
        }
    }
}

pub struct AcquireAndFilterConsumer<'a> {
    store: &'a BatchStore,
    acquirer: &'a dyn Acquirer,
    predicate: &'a ContentPredicate,
    clock: &'a dyn Clock,
    progress: &'a dyn CrawlProgressReporter,
    ledgers: ScanLedgers,
    settings: ConsumerSettings,
}

impl<'a> AcquireAndFilterConsumer<'a> {
    pub fn new(
        store: &'a BatchStore,
        acquirer: &'a dyn Acquirer,
        predicate: &'a ContentPredicate,
        clock: &'a dyn Clock,
        progress: &'a dyn CrawlProgressReporter,
        ledgers: ScanLedgers,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            store,
            acquirer,
            predicate,
            clock,
            progress,
            ledgers,
            settings,
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.ledgers.processed
    }

    /// Drain batches starting at `start`, forever, or for `max_batches`
    /// batches when given.
    ///
    /// Record-level failures are absorbed. Failing to read a ready batch or
    /// to append to a ledger is returned as an error.
    pub async fn run(&mut self, start: u64, max_batches: Option<u64>) -> Result<Vec<BatchReport>> {
        let mut reports = Vec::new();
        let mut index = start;

        while max_batches.map_or(true, |max| (reports.len() as u64) < max) {
            self.wait_for_batch(index).await;
            let report = self.process_batch(index).await?;
            log::info!(
                "Batch {} done: {} records, {} retained, {} already processed, \
                 {} clone failures, {} oversize, {} no match, {} deferred",
                report.index,
                report.total,
                report.retained,
                report.already_processed,
                report.acquire_failed,
                report.oversize,
                report.predicate_failed,
                report.deferred
            );
            reports.push(report);
            index += 1;
        }

        Ok(reports)
    }

    /// Poll until batch `index` is marked ready.
    pub async fn wait_for_batch(&self, index: u64) {
        let mut announced = false;
        while !self.store.is_ready(index) {
            if !announced {
                log::info!(
                    "{} not ready. Waiting...",
                    self.store.path(index).display()
                );
                announced = true;
            }
            self.progress.report(CrawlProgressEvent::Waiting { index });
            self.clock.sleep(self.settings.poll_interval).await;
        }
        log::info!(
            "Found {}. Starting handling...",
            self.store.path(index).display()
        );
    }

    /// Evaluate the records of a ready batch in file order, stopping once
    /// the retention cap is reached.
    ///
    /// Records after the cap are left out of the processed set, so a later
    /// run started at this batch will still evaluate them.
    pub async fn process_batch(&mut self, index: u64) -> Result<BatchReport> {
        let records = self.store.read(index)?;
        let mut report = BatchReport {
            index,
            total: records.len(),
            ..Default::default()
        };

        for (n, record) in records.iter().enumerate() {
            if report.retained >= self.settings.max_retained_per_batch {
                report.deferred = records.len() - n;
                log::info!(
                    "Retention cap of {} reached in batch {}, leaving {} records unevaluated",
                    self.settings.max_retained_per_batch,
                    index,
                    report.deferred
                );
                break;
            }

            self.progress.report(CrawlProgressEvent::Evaluating {
                index,
                n: n as u64 + 1,
                total: records.len() as u64,
                retained: report.retained as u64,
            });
            let outcome = self.process_record(record).await?;
            report.record(&outcome);
        }

        Ok(report)
    }

    /// Take one record through acquisition, measurement, and inspection.
    pub async fn process_record(&mut self, record: &RepositoryRecord) -> Result<RecordOutcome> {
        self.clock.sleep(self.settings.request_delay).await;

        if self.ledgers.processed.contains(&record.url) {
            log::info!("Already processed {}, skipping", record.url);
            return Ok(RecordOutcome::AlreadyProcessed);
        }
        self.ledgers.processed.insert(&record.url)?;

        let dest = scratch_path(&self.settings.scratch_dir, record);
        match self.acquirer.acquire(&record.url, &dest).await {
            Ok(()) => log::debug!("Cloned {} to {}", record.url, dest.display()),
            Err(AcquireError::AlreadyExists(path)) => {
                log::warn!(
                    "Cannot clone {}: {} already exists, skipping",
                    record.url,
                    path.display()
                );
                return Ok(RecordOutcome::AcquireFailed);
            }
            Err(e) => {
                log::warn!("Error cloning repository {}: {}", record.url, e);
                discard(&dest);
                return Ok(RecordOutcome::AcquireFailed);
            }
        }

        let outcome = self.inspect(record, &dest);
        discard(&dest);
        outcome
    }

    fn inspect(&self, record: &RepositoryRecord, dest: &Path) -> Result<RecordOutcome> {
        let size = match directory_size(dest) {
            Ok(size) => size,
            Err(e) => {
                log::warn!("Size of {} not measurable ({}), discarding", record.name, e);
                return Ok(RecordOutcome::OversizeDiscarded);
            }
        };
        log::debug!("Size of {}: {:.2} MiB", record.name, mib(size));
        if size > self.settings.max_repo_size_bytes {
            log::info!(
                "Repository {} too big ({:.2} MiB), discarding",
                record.name,
                mib(size)
            );
            return Ok(RecordOutcome::OversizeDiscarded);
        }

        log::info!(
            "Checking repository {} for {} and {}",
            record.name,
            self.predicate.framework_marker(),
            self.predicate.target_marker()
        );
        let paths = match self.predicate.evaluate(dest) {
            Ok(Verdict::FrameworkMissing) => {
                log::info!(
                    "{} not found in {}",
                    self.predicate.framework_marker(),
                    record.name
                );
                return Ok(RecordOutcome::PredicateFailed);
            }
            Ok(Verdict::TargetMissing) => {
                log::info!("Repository {} does not meet the conditions", record.name);
                return Ok(RecordOutcome::PredicateFailed);
            }
            Ok(Verdict::Match(paths)) => paths,
            Err(e) => {
                log::warn!("Encountered error scanning {} (skipping): {}", record.name, e);
                return Ok(RecordOutcome::PredicateFailed);
            }
        };

        let lines: Vec<String> = paths.iter().map(|p| hit_line(record, dest, p)).collect();
        log::info!(
            "Repository {} meets the conditions! {} found in:",
            record.name,
            self.predicate.target_marker()
        );
        for line in &lines {
            log::info!("- {}", line);
        }
        self.ledgers.hits.append(&lines)?;
        Ok(RecordOutcome::Retained(lines))
    }
}

/// `<url> <path within the repository>`, so a hit outlives its scratch copy.
fn hit_line(record: &RepositoryRecord, root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    format!("{} {}", record.url, relative)
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
