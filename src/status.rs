//! Crawl status overview.
//!
//! Summarizes the batch directory and the consumer's ledgers: how many
//! batches exist and are ready, how many records they hold, how many URLs
//! have been attempted, and how many hit lines were logged. Used by
//! `sieve status` to decide where to resume each side of the pipeline.

use anyhow::Result;

use crate::batch::BatchStore;
use crate::config::Config;
use crate::ledger::line_counts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlStatus {
    pub batches: usize,
    pub ready: usize,
    pub pending: Vec<u64>,
    /// Indices missing between the lowest and highest batch on disk.
    pub gaps: Vec<u64>,
    pub records: usize,
    pub next_batch_index: u64,
    pub processed_lines: usize,
    pub processed_unique: usize,
    pub hit_lines: usize,
}

/// Collect the status of the crawl described by `config`.
pub fn crawl_status(config: &Config) -> Result<CrawlStatus> {
    let store = BatchStore::new(&config.batches.dir);
    let entries = store.list()?;

    let mut records = 0;
    let mut pending = Vec::new();
    for entry in &entries {
        if entry.ready {
            records += store.read(entry.index)?.len();
        } else {
            pending.push(entry.index);
        }
    }

    let gaps = match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (first.index..=last.index)
            .filter(|i| entries.binary_search_by_key(i, |e| e.index).is_err())
            .collect(),
        _ => Vec::new(),
    };

    let next_batch_index = entries.last().map(|e| e.index + 1).unwrap_or(1);
    let (processed_lines, processed_unique) = line_counts(&config.scan.processed_log)?;
    let (hit_lines, _) = line_counts(&config.scan.hits_log)?;

    Ok(CrawlStatus {
        batches: entries.len(),
        ready: entries.len() - pending.len(),
        pending,
        gaps,
        records,
        next_batch_index,
        processed_lines,
        processed_unique,
        hit_lines,
    })
}

/// Run the status command: collect and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let status = crawl_status(config)?;

    println!("Repo Sieve: Crawl Status");
    println!("========================");
    println!();
    println!("  Batch dir:   {}", config.batches.dir.display());
    println!("  Batches:     {} ({} ready)", status.batches, status.ready);
    if !status.pending.is_empty() {
        println!("  Pending:     {}", join(&status.pending));
    }
    if !status.gaps.is_empty() {
        println!("  Gaps:        {}", join(&status.gaps));
    }
    println!("  Records:     {}", status.records);
    println!("  Next batch:  {}", status.next_batch_index);
    println!();
    println!("  Processed:   {}", config.scan.processed_log.display());
    println!(
        "  Attempted:   {} URLs ({} log lines)",
        status.processed_unique, status.processed_lines
    );
    println!("  Hits:        {} ({})", status.hit_lines, config.scan.hits_log.display());

    Ok(())
}

fn join(indices: &[u64]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
