//! # Repo Sieve
//!
//! A resumable, rate-limited crawler that collects repositories from code
//! search and keeps only those whose contents match a compound predicate.
//!
//! Two independent processes cooperate through flat files:
//!
//! ```text
//! ┌──────────────┐  repositories_N.csv  ┌──────────────┐
//! │   collect    │ ───────────────────▶ │     scan     │
//! │  (producer)  │   + .done marker     │  (consumer)  │
//! └──────┬───────┘                      └──────┬───────┘
//!        │                                     │
//!   search API                         git clone → inspect
//!   (backoff)                          processed.txt, hits.txt
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sieve collect --token $GITHUB_TOKEN --out ./urlstash
//! sieve scan --dir ./urlstash              # in another terminal
//! sieve status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records, resume cursor, record outcomes |
//! | [`clock`] | Injectable time source and sleep |
//! | [`backoff`] | Rate-limit backoff controller |
//! | [`github`] | Repository search client |
//! | [`batch`] | Batch file store |
//! | [`ledger`] | Processed set and hits log |
//! | [`producer`] | Paginated search producer |
//! | [`acquire`] | Repository cloning into scratch directories |
//! | [`inspect`] | Size measurement and content predicate |
//! | [`consumer`] | Acquire-and-filter consumer loop |
//! | [`progress`] | Progress reporting |
//! | [`status`] | Crawl status summary |

pub mod acquire;
pub mod backoff;
pub mod batch;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod github;
pub mod inspect;
pub mod ledger;
pub mod models;
pub mod producer;
pub mod progress;
pub mod status;
