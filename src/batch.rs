//! Numbered batch files: the hand-off queue between producer and consumer.
//!
//! Batch `n` lives at `<dir>/repositories_<n>.csv`, one record per line as
//! `name, stars, url` with no header. The producer appends a term's records,
//! rewrites the file without duplicate lines, and only then creates the
//! sibling marker `repositories_<n>.csv.done`. The consumer treats a batch as
//! ready when the marker exists, never on the data file alone.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::RepositoryRecord;

const FILE_PREFIX: &str = "repositories_";
const FILE_SUFFIX: &str = ".csv";
const MARKER_SUFFIX: &str = ".done";

/// Line counts before and after a dedup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupStats {
    pub before: usize,
    pub after: usize,
}

/// A batch file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub index: u64,
    pub ready: bool,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BatchStore {
    dir: PathBuf,
}

impl BatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{index}{FILE_SUFFIX}"))
    }

    pub fn marker_path(&self, index: u64) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{index}{FILE_SUFFIX}{MARKER_SUFFIX}"))
    }

    /// Whether batch `index` has been fully written and deduplicated.
    pub fn is_ready(&self, index: u64) -> bool {
        self.marker_path(index).exists()
    }

    /// Append records to batch `index`, creating the file if needed.
    pub fn append(&self, index: u64, records: &[RepositoryRecord]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create batch directory: {}", self.dir.display()))?;
        let path = self.path(index);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open batch file: {}", path.display()))?;

        let mut buf = String::new();
        for record in records {
            buf.push_str(&format_line(record));
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .with_context(|| format!("Failed to append to batch file: {}", path.display()))?;
        Ok(())
    }

    /// Rewrite batch `index` keeping only the first occurrence of each line.
    ///
    /// Idempotent: a second pass over an already deduplicated file leaves it
    /// unchanged.
    pub fn dedup(&self, index: u64) -> Result<DedupStats> {
        let path = self.path(index);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;

        let mut seen = HashSet::new();
        let mut before = 0;
        let mut out = String::with_capacity(content.len());
        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            before += 1;
            if seen.insert(line) {
                out.push_str(line);
                out.push('\n');
            }
        }
        let after = seen.len();

        let tmp = path.with_extension("csv.tmp");
        fs::write(&tmp, out)
            .with_context(|| format!("Failed to write batch file: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace batch file: {}", path.display()))?;

        Ok(DedupStats { before, after })
    }

    /// Write a complete batch: append, dedup, then mark ready.
    ///
    /// An empty `records` slice still produces an (empty) ready batch so that
    /// batch numbering stays contiguous with term order. A stale marker from
    /// an earlier run is removed first so the consumer never sees a ready
    /// batch mid-rewrite.
    pub fn write_batch(&self, index: u64, records: &[RepositoryRecord]) -> Result<DedupStats> {
        let marker = self.marker_path(index);
        if marker.exists() {
            fs::remove_file(&marker)
                .with_context(|| format!("Failed to remove stale marker: {}", marker.display()))?;
        }

        self.append(index, records)?;
        let stats = self.dedup(index)?;

        fs::write(&marker, b"")
            .with_context(|| format!("Failed to write batch marker: {}", marker.display()))?;
        Ok(stats)
    }

    /// Read batch `index` in file order. Lines that do not parse as
    /// `name, stars, url` are skipped with a warning.
    pub fn read(&self, index: u64) -> Result<Vec<RepositoryRecord>> {
        let path = self.path(index);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open batch file: {}", path.display()))?;

        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<RepositoryRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => log::warn!(
                    "Skipping malformed line {} in {}: {}",
                    line + 1,
                    path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }

    /// All batch files in the directory, sorted by index.
    pub fn list(&self) -> Result<Vec<BatchEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list batch directory: {}", self.dir.display()))?
        {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(index) = file_name.to_str().and_then(parse_index) else {
                continue;
            };
            entries.push(BatchEntry {
                index,
                ready: self.is_ready(index),
                path: entry.path(),
            });
        }
        entries.sort_by_key(|e| e.index);
        Ok(entries)
    }
}

fn format_line(record: &RepositoryRecord) -> String {
    format!("{}, {}, {}", record.name, record.stars, record.url)
}

fn parse_index(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rec(name: &str, stars: u64) -> RepositoryRecord {
        RepositoryRecord::new(name, stars, format!("https://github.com/o/{}", name))
    }

    #[test]
    fn test_paths() {
        let store = BatchStore::new("/data/stash");
        assert_eq!(
            store.path(3),
            PathBuf::from("/data/stash/repositories_3.csv")
        );
        assert_eq!(
            store.marker_path(3),
            PathBuf::from("/data/stash/repositories_3.csv.done")
        );
    }

    #[test]
    fn test_line_format() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        store.append(1, &[rec("alpha", 12)]).unwrap();
        let content = fs::read_to_string(store.path(1)).unwrap();
        assert_eq!(content, "alpha, 12, https://github.com/o/alpha\n");
    }

    #[test]
    fn test_write_batch_dedups_and_marks_ready() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path().join("stash"));
        assert!(!store.is_ready(1));

        let stats = store
            .write_batch(1, &[rec("a", 11), rec("b", 12), rec("a", 11), rec("c", 13)])
            .unwrap();
        assert_eq!(stats, DedupStats { before: 4, after: 3 });
        assert!(store.is_ready(1));

        let records = store.read(1).unwrap();
        assert_eq!(records, vec![rec("a", 11), rec("b", 12), rec("c", 13)]);
    }

    #[test]
    fn test_dedup_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        store
            .append(2, &[rec("x", 1), rec("y", 2), rec("x", 1), rec("y", 2)])
            .unwrap();

        store.dedup(2).unwrap();
        let once = fs::read_to_string(store.path(2)).unwrap();
        let stats = store.dedup(2).unwrap();
        let twice = fs::read_to_string(store.path(2)).unwrap();

        assert_eq!(once, twice);
        assert_eq!(stats, DedupStats { before: 2, after: 2 });
    }

    #[test]
    fn test_empty_batch_is_ready() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        let stats = store.write_batch(5, &[]).unwrap();
        assert_eq!(stats, DedupStats { before: 0, after: 0 });
        assert!(store.is_ready(5));
        assert!(store.read(5).unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_existing_batch_merges() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        store.write_batch(1, &[rec("a", 1)]).unwrap();
        store.write_batch(1, &[rec("a", 1), rec("b", 2)]).unwrap();
        assert_eq!(store.read(1).unwrap(), vec![rec("a", 1), rec("b", 2)]);
        assert!(store.is_ready(1));
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        fs::write(
            store.path(1),
            "alpha, 12, https://github.com/o/alpha\nnot a record\nbeta, many, https://github.com/o/beta\n",
        )
        .unwrap();
        let records = store.read(1).unwrap();
        assert_eq!(records, vec![rec("alpha", 12)]);
    }

    #[test]
    fn test_list_sorted_with_readiness() {
        let tmp = TempDir::new().unwrap();
        let store = BatchStore::new(tmp.path());
        store.write_batch(10, &[rec("a", 1)]).unwrap();
        store.write_batch(2, &[rec("b", 1)]).unwrap();
        store.append(3, &[rec("c", 1)]).unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let listed: Vec<_> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|e| (e.index, e.ready))
            .collect();
        assert_eq!(listed, vec![(2, true), (3, false), (10, true)]);
    }
}
