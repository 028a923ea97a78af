//! End-to-end runs of the producer and consumer against in-memory fakes.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use repo_sieve::acquire::{AcquireError, Acquirer};
use repo_sieve::backoff::RateLimitSignal;
use repo_sieve::batch::BatchStore;
use repo_sieve::clock::ManualClock;
use repo_sieve::consumer::{AcquireAndFilterConsumer, ConsumerSettings, ScanLedgers};
use repo_sieve::github::{RepositorySearch, SearchError, SearchQuery, SearchResponse};
use repo_sieve::inspect::ContentPredicate;
use repo_sieve::ledger::{HitLog, ProcessedSet};
use repo_sieve::models::{RepositoryRecord, ResumeCursor};
use repo_sieve::producer::{PaginationStop, ProducerSettings, SearchProducer};
use repo_sieve::progress::NoProgress;

struct ScriptedSearch {
    script: Mutex<HashMap<String, VecDeque<SearchResponse>>>,
}

impl ScriptedSearch {
    fn new(script: Vec<(&str, Vec<SearchResponse>)>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(t, r)| (t.to_string(), r.into_iter().collect()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl RepositorySearch for ScriptedSearch {
    async fn search_page(
        &self,
        query: &SearchQuery,
        _page: u32,
    ) -> Result<SearchResponse, SearchError> {
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&query.term)
            .and_then(|q| q.pop_front());
        Ok(next.unwrap_or(SearchResponse::Page(Vec::new())))
    }
}

/// Materializes a canned tree for known URLs; anything else fails to clone.
struct FixtureAcquirer {
    repos: HashMap<String, Vec<(&'static str, &'static str)>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Acquirer for FixtureAcquirer {
    async fn acquire(&self, url: &str, dest: &Path) -> Result<(), AcquireError> {
        self.calls.lock().unwrap().push(url.to_string());
        let files = self
            .repos
            .get(url)
            .ok_or_else(|| AcquireError::Failed("repository not found".into()))?;
        for (rel, content) in files {
            let path = dest.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        Ok(())
    }
}

fn record(name: &str) -> RepositoryRecord {
    RepositoryRecord::new(name, 12, format!("https://github.com/o/{name}"))
}

fn page(prefix: &str, range: std::ops::Range<usize>) -> SearchResponse {
    SearchResponse::Page(range.map(|i| record(&format!("{prefix}{i}"))).collect())
}

fn producer_settings() -> ProducerSettings {
    ProducerSettings {
        language: "python".into(),
        min_stars: 11,
        max_stars: 13,
        page_size: 50,
        max_retries: 5,
        request_delay: Duration::from_secs(1),
        term_cooldown: Duration::from_secs(60),
    }
}

fn consumer_settings(tmp: &TempDir) -> ConsumerSettings {
    ConsumerSettings {
        max_repo_size_bytes: 1024 * 1024,
        max_retained_per_batch: 100,
        request_delay: Duration::from_secs(1),
        poll_interval: Duration::from_secs(5),
        scratch_dir: tmp.path().join("scratch"),
    }
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
}

#[tokio::test]
async fn test_collect_then_scan() {
    let tmp = TempDir::new().unwrap();
    let store = BatchStore::new(tmp.path().join("stash"));
    let terms: Vec<String> = vec!["alpha".into(), "beta".into()];

    // alpha: a full page, then a short page that repeats one earlier record.
    let mut second = vec![record("a0")];
    second.extend((50..52).map(|i| record(&format!("a{i}"))));
    let search = ScriptedSearch::new(vec![(
        "alpha",
        vec![page("a", 0..50), SearchResponse::Page(second)],
    )]);

    let producer_clock = clock();
    let producer = SearchProducer::new(
        &search,
        &store,
        &producer_clock,
        &NoProgress,
        producer_settings(),
    );
    let cursor = ResumeCursor::resolve(&terms, None, 1).unwrap();
    let summary = producer.run(&terms, cursor).await.unwrap();

    assert_eq!(summary.terms.len(), 2);
    assert_eq!(summary.terms[0].stop, PaginationStop::LastPage);
    assert_eq!(summary.terms[0].dedup.before, 53);
    assert_eq!(summary.terms[0].dedup.after, 52);
    assert_eq!(summary.next_batch_index, 3);
    assert!(store.is_ready(1));
    assert!(store.is_ready(2));
    assert!(store.read(2).unwrap().is_empty());

    let acquirer = FixtureAcquirer {
        repos: HashMap::from([
            (
                "https://github.com/o/a7".to_string(),
                vec![
                    ("app.py", "from flask import Flask\nrender_template_string(x)\n"),
                    ("README.md", "demo"),
                ],
            ),
            (
                "https://github.com/o/a8".to_string(),
                vec![("app.py", "from flask import Flask\n")],
            ),
        ]),
        calls: Mutex::new(Vec::new()),
    };
    let predicate =
        ContentPredicate::new("flask", "render_template_string", &["**/.git/**".to_string()])
            .unwrap();
    let processed_path = tmp.path().join("processed.txt");
    let hits_path = tmp.path().join("hits.txt");

    let consumer_clock = clock();
    let mut consumer = AcquireAndFilterConsumer::new(
        &store,
        &acquirer,
        &predicate,
        &consumer_clock,
        &NoProgress,
        ScanLedgers {
            processed: ProcessedSet::load(&processed_path).unwrap(),
            hits: HitLog::new(&hits_path),
        },
        consumer_settings(&tmp),
    );
    let reports = consumer.run(1, Some(2)).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].total, 52);
    assert_eq!(reports[0].retained, 1);
    assert_eq!(reports[0].predicate_failed, 1);
    assert_eq!(reports[0].acquire_failed, 50);
    assert_eq!(reports[1].total, 0);

    let hits = fs::read_to_string(&hits_path).unwrap();
    assert_eq!(hits.lines().count(), 1);
    assert_eq!(hits, "https://github.com/o/a7 app.py\n");
    assert_eq!(fs::read_to_string(&processed_path).unwrap().lines().count(), 52);

    // Scratch copies are gone whatever the outcome.
    let scratch = tmp.path().join("scratch");
    assert!(!scratch.exists() || fs::read_dir(&scratch).unwrap().next().is_none());

    // A restarted consumer skips everything it already attempted.
    let acquirer_calls = acquirer.calls.lock().unwrap().len();
    let restart_clock = clock();
    let mut restarted = AcquireAndFilterConsumer::new(
        &store,
        &acquirer,
        &predicate,
        &restart_clock,
        &NoProgress,
        ScanLedgers {
            processed: ProcessedSet::load(&processed_path).unwrap(),
            hits: HitLog::new(&hits_path),
        },
        consumer_settings(&tmp),
    );
    let reports = restarted.run(1, Some(1)).await.unwrap();
    assert_eq!(reports[0].already_processed, 52);
    assert_eq!(acquirer.calls.lock().unwrap().len(), acquirer_calls);
    assert_eq!(fs::read_to_string(&hits_path).unwrap().lines().count(), 1);
}

#[tokio::test]
async fn test_resume_after_rate_limit() {
    let tmp = TempDir::new().unwrap();
    let store = BatchStore::new(tmp.path().join("stash"));
    let terms: Vec<String> = vec!["alpha".into(), "beta".into(), "gamma".into()];

    let search = ScriptedSearch::new(vec![(
        "beta",
        vec![
            SearchResponse::RateLimited(RateLimitSignal {
                retry_after_secs: Some(7),
                ..Default::default()
            }),
            page("b", 0..3),
        ],
    )]);

    let clock = clock();
    let producer = SearchProducer::new(&search, &store, &clock, &NoProgress, producer_settings());
    let cursor = ResumeCursor::resolve(&terms, Some("beta"), 10).unwrap();
    let summary = producer.run(&terms, cursor).await.unwrap();

    assert_eq!(summary.terms.len(), 2);
    assert_eq!(summary.terms[0].term, "beta");
    assert_eq!(summary.terms[0].batch_index, 10);
    assert_eq!(summary.terms[1].batch_index, 11);
    assert_eq!(summary.next_batch_index, 12);
    assert!(clock.sleeps().contains(&Duration::from_secs(7)));

    assert!(!store.path(1).exists());
    let batch = store.read(10).unwrap();
    assert_eq!(
        batch.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        vec!["b0", "b1", "b2"]
    );
}
