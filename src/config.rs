//! TOML configuration parsing and validation.
//!
//! Every setting has a default, so a missing config file yields a working
//! setup ([`Config::minimal`]). CLI flags are applied on top of the loaded
//! config by the binary.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest page size the search endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub batches: BatchesConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_min_stars")]
    pub min_stars: u32,
    #[serde(default = "default_max_stars")]
    pub max_stars: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_term_cooldown_secs")]
    pub term_cooldown_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_terms")]
    pub terms: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            language: default_language(),
            min_stars: default_min_stars(),
            max_stars: default_max_stars(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            request_delay_ms: default_delay_ms(),
            term_cooldown_secs: default_term_cooldown_secs(),
            request_timeout_secs: default_timeout_secs(),
            terms: default_terms(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_language() -> String {
    "python".to_string()
}
fn default_min_stars() -> u32 {
    11
}
fn default_max_stars() -> u32 {
    13
}
fn default_page_size() -> u32 {
    50
}
fn default_max_retries() -> u32 {
    5
}
fn default_delay_ms() -> u64 {
    1000
}
fn default_term_cooldown_secs() -> u64 {
    60
}
fn default_timeout_secs() -> u64 {
    30
}

/// Built-in search vocabulary, aimed at small web application projects.
pub const DEFAULT_TERMS: &[&str] = &[
    "webui", "store", "shop", "centre", "webapp", "recipe", "responsive", "backend", "async",
    "django", "social", "service", "endpoint", "application", "flask", "worker", "log", "view",
    "tracker", "angular", "black", "calendar", "mongodb", "frontend", "inventory", "heroku",
    "tailwind", "middleware", "sqlite", "login", "upload", "app", "csrf", "form", "dashboard",
    "serializer", "router", "graphql", "mongo", "materialize", "realtime", "reservation", "blog",
    "session", "template", "wiki", "model", "mobile", "database", "download", "web2py", "json",
    "security", "forum", "chat", "actions", "booking", "server", "css", "authorization",
    "storage", "redis", "falcon", "bootstrap", "unittest", "migration", "testing", "websockets",
    "bulma", "management", "gallery", "portfolio", "ci", "mvc", "yaml", "portal", "sqlalchemy",
    "monitor", "fastapi", "report", "oauth", "metrics", "postgresql", "mysql", "pyramid", "jwt",
    "admin", "notification", "route", "monitoring", "cookie", "analytics", "rest", "task",
    "bottle", "webpack", "queue", "logging", "sql", "fullstack", "file", "token", "api",
    "deploy", "authentication", "http", "html", "coverage", "websocket", "ecommerce", "auth",
    "framework", "web", "desktop",
];

fn default_terms() -> Vec<String> {
    DEFAULT_TERMS.iter().map(|t| t.to_string()).collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchesConfig {
    #[serde(default = "default_batch_dir")]
    pub dir: PathBuf,
}

impl Default for BatchesConfig {
    fn default() -> Self {
        Self {
            dir: default_batch_dir(),
        }
    }
}

fn default_batch_dir() -> PathBuf {
    PathBuf::from("./urlstash")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_framework_marker")]
    pub framework_marker: String,
    #[serde(default = "default_target_marker")]
    pub target_marker: String,
    #[serde(default = "default_max_repo_size_mb")]
    pub max_repo_size_mb: u64,
    #[serde(default = "default_max_retained")]
    pub max_retained_per_batch: usize,
    #[serde(default = "default_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub shallow_clone: bool,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default = "default_processed_log")]
    pub processed_log: PathBuf,
    #[serde(default = "default_hits_log")]
    pub hits_log: PathBuf,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            framework_marker: default_framework_marker(),
            target_marker: default_target_marker(),
            max_repo_size_mb: default_max_repo_size_mb(),
            max_retained_per_batch: default_max_retained(),
            request_delay_ms: default_delay_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            shallow_clone: default_true(),
            scratch_dir: default_scratch_dir(),
            processed_log: default_processed_log(),
            hits_log: default_hits_log(),
            exclude_globs: default_exclude_globs(),
        }
    }
}

impl ScanConfig {
    /// Size ceiling for a single acquired repository, in bytes.
    pub fn max_repo_size_bytes(&self) -> u64 {
        self.max_repo_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_framework_marker() -> String {
    "flask".to_string()
}
fn default_target_marker() -> String {
    "render_template_string".to_string()
}
fn default_max_repo_size_mb() -> u64 {
    100
}
fn default_max_retained() -> usize {
    100
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_acquire_timeout_secs() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./scratch")
}
fn default_processed_log() -> PathBuf {
    PathBuf::from("./processed.txt")
}
fn default_hits_log() -> PathBuf {
    PathBuf::from("./hits.txt")
}
fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}

impl Config {
    /// Configuration used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints. Called after loading and again after
    /// CLI overrides have been applied.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.min_stars > search.max_stars {
            bail!(
                "search.min_stars ({}) must be <= search.max_stars ({})",
                search.min_stars,
                search.max_stars
            );
        }
        if search.page_size == 0 || search.page_size > MAX_PAGE_SIZE {
            bail!("search.page_size must be in 1..={}", MAX_PAGE_SIZE);
        }
        if search.language.trim().is_empty() {
            bail!("search.language must not be empty");
        }
        if search.terms.is_empty() {
            bail!("search.terms must contain at least one term");
        }
        if search.terms.iter().any(|t| t.trim().is_empty()) {
            bail!("search.terms must not contain blank entries");
        }

        let scan = &self.scan;
        if scan.framework_marker.is_empty() || scan.target_marker.is_empty() {
            bail!("scan.framework_marker and scan.target_marker must not be empty");
        }
        if scan.max_retained_per_batch == 0 {
            bail!("scan.max_retained_per_batch must be >= 1");
        }
        if scan.poll_interval_secs == 0 {
            bail!("scan.poll_interval_secs must be >= 1");
        }
        if scan.acquire_timeout_secs == 0 {
            bail!("scan.acquire_timeout_secs must be >= 1");
        }

        Ok(())
    }
}

/// Load and validate the config file at `path`.
///
/// A missing file is not an error: the built-in defaults are used instead.
/// A file that exists but fails to parse or validate is.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::info!(
            "Config file {} not found, using built-in defaults",
            path.display()
        );
        return Ok(Config::minimal());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
