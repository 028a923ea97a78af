//! Crawl progress reporting.
//!
//! Reports what the producer and consumer are doing (which term and page is
//! being searched, which batch was written, which batch the consumer is
//! waiting on or evaluating). Progress is emitted on **stderr** so stdout
//! stays free for command output.

use std::io::Write;

/// A single progress event from the producer or consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrawlProgressEvent {
    /// Producer is requesting a page for a term.
    Searching { term: String, page: u32 },
    /// Producer finished a term and wrote its batch file.
    BatchWritten {
        index: u64,
        term: String,
        records: usize,
    },
    /// Consumer is waiting for a batch to become ready.
    Waiting { index: u64 },
    /// Consumer is evaluating record `n` of `total` in a batch.
    Evaluating {
        index: u64,
        n: u64,
        total: u64,
        retained: u64,
    },
}

/// Reports crawl progress. Implementations write to stderr (human or JSON).
pub trait CrawlProgressReporter: Send + Sync {
    fn report(&self, event: CrawlProgressEvent);
}

/// Human-friendly progress on stderr: "scan batch 4  evaluating  12 / 1,250 (retained 3)".
pub struct StderrProgress;

impl CrawlProgressReporter for StderrProgress {
    fn report(&self, event: CrawlProgressEvent) {
        let line = match &event {
            CrawlProgressEvent::Searching { term, page } => {
                format!("collect {}  page {}\n", term, page)
            }
            CrawlProgressEvent::BatchWritten {
                index,
                term,
                records,
            } => format!(
                "collect {}  wrote batch {}  {} records\n",
                term,
                index,
                format_number(*records as u64)
            ),
            CrawlProgressEvent::Waiting { index } => {
                format!("scan batch {}  waiting...\n", index)
            }
            CrawlProgressEvent::Evaluating {
                index,
                n,
                total,
                retained,
            } => format!(
                "scan batch {}  evaluating  {} / {} (retained {})\n",
                index,
                format_number(*n),
                format_number(*total),
                retained
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl CrawlProgressReporter for JsonProgress {
    fn report(&self, event: CrawlProgressEvent) {
        let obj = match &event {
            CrawlProgressEvent::Searching { term, page } => serde_json::json!({
                "event": "progress",
                "phase": "searching",
                "term": term,
                "page": page
            }),
            CrawlProgressEvent::BatchWritten {
                index,
                term,
                records,
            } => serde_json::json!({
                "event": "progress",
                "phase": "batch_written",
                "batch": index,
                "term": term,
                "records": records
            }),
            CrawlProgressEvent::Waiting { index } => serde_json::json!({
                "event": "progress",
                "phase": "waiting",
                "batch": index
            }),
            CrawlProgressEvent::Evaluating {
                index,
                n,
                total,
                retained,
            } => serde_json::json!({
                "event": "progress",
                "phase": "evaluating",
                "batch": index,
                "n": n,
                "total": total,
                "retained": retained
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl CrawlProgressReporter for NoProgress {
    fn report(&self, _event: CrawlProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Resolve `Auto` against the current stderr.
    pub fn resolve(self) -> Self {
        match self {
            ProgressMode::Auto => {
                if atty::is(atty::Stream::Stderr) {
                    ProgressMode::Human
                } else {
                    ProgressMode::Off
                }
            }
            other => other,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn CrawlProgressReporter> {
        match self.resolve() {
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
            ProgressMode::Auto | ProgressMode::Off => Box::new(NoProgress),
        }
    }
}
