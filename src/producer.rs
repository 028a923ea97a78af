//! Search producer: turns the term list into numbered batch files.
//!
//! For every term from the resume cursor onward the producer pages through
//! the search API, stops on a short page, a page identical to the previous
//! one, exhausted rate-limit retries, or any other failure, then writes
//! whatever it collected as the next batch. One term always yields exactly
//! one batch, even when it found nothing, so batch `n` always corresponds
//! to the `n`-th term searched.

use anyhow::Result;
use std::time::Duration;

use crate::backoff::BackoffController;
use crate::batch::{BatchStore, DedupStats};
use crate::clock::Clock;
use crate::config::SearchConfig;
use crate::github::{RepositorySearch, SearchQuery, SearchResponse};
use crate::models::{RepositoryRecord, ResumeCursor};
use crate::progress::{CrawlProgressEvent, CrawlProgressReporter};

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub language: String,
    pub min_stars: u32,
    pub max_stars: u32,
    pub page_size: u32,
    pub max_retries: u32,
    pub request_delay: Duration,
    pub term_cooldown: Duration,
}

impl From<&SearchConfig> for ProducerSettings {
    fn from(config: &SearchConfig) -> Self {
        Self {
            language: config.language.clone(),
            min_stars: config.min_stars,
            max_stars: config.max_stars,
            page_size: config.page_size,
            max_retries: config.max_retries,
            request_delay: Duration::from_millis(config.request_delay_ms),
            term_cooldown: Duration::from_secs(config.term_cooldown_secs),
        }
    }
}

/// Why pagination for a term ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStop {
    /// A page came back with fewer results than the page size.
    LastPage,
    /// A page was identical to the one before it.
    RepeatedPage,
    /// Rate-limit backoff gave up.
    RetriesExhausted,
    /// A non-rate-limit error status, transport error, or bad body.
    Failed,
}

#[derive(Debug, Clone)]
pub struct TermOutcome {
    pub term: String,
    pub batch_index: u64,
    pub pages: u32,
    pub stop: PaginationStop,
    pub dedup: DedupStats,
}

#[derive(Debug, Clone)]
pub struct ProducerSummary {
    pub terms: Vec<TermOutcome>,
    pub records_collected: usize,
    /// First batch index not written by this run.
    pub next_batch_index: u64,
}

pub struct SearchProducer<'a> {
    search: &'a dyn RepositorySearch,
    store: &'a BatchStore,
    clock: &'a dyn Clock,
    progress: &'a dyn CrawlProgressReporter,
    settings: ProducerSettings,
}

impl<'a> SearchProducer<'a> {
    pub fn new(
        search: &'a dyn RepositorySearch,
        store: &'a BatchStore,
        clock: &'a dyn Clock,
        progress: &'a dyn CrawlProgressReporter,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            search,
            store,
            clock,
            progress,
            settings,
        }
    }

    /// Search every term from `cursor.term_index` on, writing one batch per
    /// term starting at `cursor.batch_index`.
    ///
    /// Search failures are absorbed per term. Failing to write a batch file
    /// is returned as an error, since continuing would break the batch
    /// numbering the consumer depends on.
    pub async fn run(&self, terms: &[String], cursor: ResumeCursor) -> Result<ProducerSummary> {
        for term in terms.iter().take(cursor.term_index) {
            log::info!(
                "Skipping term: {} to resume at set starting point ({})",
                term,
                terms
                    .get(cursor.term_index)
                    .map(String::as_str)
                    .unwrap_or("<end>")
            );
        }

        let mut outcomes = Vec::new();
        let mut collected = 0usize;
        let mut batch_index = cursor.batch_index;

        for (offset, term) in terms.iter().skip(cursor.term_index).enumerate() {
            log::info!(
                "Currently at: {}, already collected: {} repos",
                term,
                collected
            );

            let (records, pages, stop) = self.search_term(term).await;
            collected += records.len();

            let dedup = self.store.write_batch(batch_index, &records)?;
            log::info!(
                "Wrote {} ({} -> {} rows after duplicate removal)",
                self.store.path(batch_index).display(),
                dedup.before,
                dedup.after
            );
            self.progress.report(CrawlProgressEvent::BatchWritten {
                index: batch_index,
                term: term.clone(),
                records: dedup.after,
            });

            outcomes.push(TermOutcome {
                term: term.clone(),
                batch_index,
                pages,
                stop,
                dedup,
            });
            batch_index += 1;

            match terms.get(cursor.term_index + offset + 1) {
                Some(next) => {
                    log::info!(
                        "Resume point: --starting-point {} --file-batch-index {}",
                        next,
                        batch_index
                    );
                    log::info!(
                        "Sleeping for {}s before searching for next keyword...",
                        self.settings.term_cooldown.as_secs()
                    );
                    self.clock.sleep(self.settings.term_cooldown).await;
                }
                None => log::info!("All terms searched"),
            }
        }

        Ok(ProducerSummary {
            terms: outcomes,
            records_collected: collected,
            next_batch_index: batch_index,
        })
    }

    /// Page through the results for one term.
    ///
    /// Returns the accumulated records, the number of pages that returned
    /// results, and why pagination ended.
    pub async fn search_term(&self, term: &str) -> (Vec<RepositoryRecord>, u32, PaginationStop) {
        let query = SearchQuery {
            term: term.to_string(),
            language: self.settings.language.clone(),
            min_stars: self.settings.min_stars,
            max_stars: self.settings.max_stars,
            page_size: self.settings.page_size,
        };

        let mut backoff = BackoffController::new(self.settings.max_retries);
        let mut records = Vec::new();
        let mut previous: Option<Vec<RepositoryRecord>> = None;
        let mut page = 1u32;
        let mut pages = 0u32;

        let stop = loop {
            self.clock.sleep(self.settings.request_delay).await;
            self.progress.report(CrawlProgressEvent::Searching {
                term: term.to_string(),
                page,
            });
            log::debug!("Requesting term={} page={}", term, page);

            match self.search.search_page(&query, page).await {
                Ok(SearchResponse::Page(results)) => {
                    if previous.as_ref() == Some(&results) {
                        log::warn!(
                            "Page {} for '{}' repeats the previous page, stopping",
                            page,
                            term
                        );
                        break PaginationStop::RepeatedPage;
                    }
                    pages += 1;
                    records.extend(results.iter().cloned());

                    if results.len() < self.settings.page_size as usize {
                        log::info!("Encountered last page for '{}' at page {}", term, page);
                        break PaginationStop::LastPage;
                    }
                    previous = Some(results);
                    page += 1;
                }
                Ok(SearchResponse::RateLimited(signal)) => {
                    if !backoff.wait(&signal, self.clock).await {
                        break PaginationStop::RetriesExhausted;
                    }
                }
                Ok(SearchResponse::Failed { status, message }) => {
                    log::error!("Search for '{}' failed: HTTP {} {}", term, status, message);
                    break PaginationStop::Failed;
                }
                Err(e) => {
                    log::error!("Search for '{}' failed: {}", term, e);
                    break PaginationStop::Failed;
                }
            }
        };

        (records, pages, stop)
    }
}
