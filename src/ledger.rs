//! Append-only ledgers kept by the consumer.
//!
//! - [`ProcessedSet`]: every repository URL the consumer has attempted, one
//!   per line. Loaded once at startup; duplicate lines from earlier runs are
//!   absorbed by the in-memory set.
//! - [`HitLog`]: one matching file path per line.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ProcessedSet {
    path: PathBuf,
    urls: HashSet<String>,
    file: Option<File>,
}

impl ProcessedSet {
    /// Load the log at `path`. A missing log is an empty set.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut urls = HashSet::new();

        if path.exists() {
            let bytes = fs::read(&path)
                .with_context(|| format!("Failed to read processed log: {}", path.display()))?;
            let content = String::from_utf8_lossy(&bytes);
            urls.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
            log::info!("Initialized processed set with {} URLs", urls.len());
        } else {
            log::info!(
                "{} does not exist, starting with an empty processed set",
                path.display()
            );
        }

        Ok(Self {
            path,
            urls,
            file: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url.trim())
    }

    /// Record `url` as attempted, in memory and on disk.
    ///
    /// Returns `false` without touching the log if it was already present.
    pub fn insert(&mut self, url: &str) -> Result<bool> {
        let url = url.trim();
        if self.urls.contains(url) {
            return Ok(false);
        }

        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| {
                    format!("Failed to open processed log: {}", self.path.display())
                })?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            writeln!(file, "{}", url)
                .and_then(|_| file.flush())
                .with_context(|| {
                    format!("Failed to append to processed log: {}", self.path.display())
                })?;
        }

        self.urls.insert(url.to_string());
        Ok(true)
    }
}

pub struct HitLog {
    path: PathBuf,
}

impl HitLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line per path.
    pub fn append(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open hits log: {}", self.path.display()))?;

        let mut buf = String::new();
        for p in paths {
            buf.push_str(p);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("Failed to append to hits log: {}", self.path.display()))?;
        Ok(())
    }
}

/// Count non-empty lines and distinct non-empty lines of a line log.
/// A missing file counts as empty.
pub fn line_counts(path: &Path) -> Result<(usize, usize)> {
    if !path.exists() {
        return Ok((0, 0));
    }
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let unique: HashSet<&str> = lines.iter().copied().collect();
    Ok((lines.len(), unique.len()))
}
