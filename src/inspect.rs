//! Content inspection of an acquired repository.
//!
//! A repository is retained when some file contains the framework marker and
//! at least one file contains the target marker. The framework check runs
//! first and stops at the first hit; the target check collects every
//! matching file, since each becomes a line in the hits log.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    FrameworkMissing,
    TargetMissing,
    Match(Vec<PathBuf>),
}

pub struct ContentPredicate {
    framework_marker: String,
    target_marker: String,
    exclude_set: GlobSet,
}

impl ContentPredicate {
    pub fn new(framework_marker: &str, target_marker: &str, exclude_globs: &[String]) -> Result<Self> {
        Ok(Self {
            framework_marker: framework_marker.to_string(),
            target_marker: target_marker.to_string(),
            exclude_set: build_globset(exclude_globs)?,
        })
    }

    pub fn framework_marker(&self) -> &str {
        &self.framework_marker
    }

    pub fn target_marker(&self) -> &str {
        &self.target_marker
    }

    /// Run both checks over the files under `root`.
    pub fn evaluate(&self, root: &Path) -> Result<Verdict> {
        if !self.any_file_contains(root, &self.framework_marker)? {
            return Ok(Verdict::FrameworkMissing);
        }
        let matches = self.files_containing(root, &self.target_marker)?;
        if matches.is_empty() {
            Ok(Verdict::TargetMissing)
        } else {
            Ok(Verdict::Match(matches))
        }
    }

    /// Every file under `root` whose contents include `needle`, in walk order.
    pub fn files_containing(&self, root: &Path, needle: &str) -> Result<Vec<PathBuf>> {
        let mut matches = Vec::new();
        for path in self.files(root) {
            let path = path?;
            if file_contains(&path, needle)? {
                matches.push(path);
            }
        }
        Ok(matches)
    }

    fn any_file_contains(&self, root: &Path, needle: &str) -> Result<bool> {
        for path in self.files(root) {
            if file_contains(&path?, needle)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Regular files under `root` that are not excluded. Symlinks are not
    /// followed.
    fn files<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = Result<PathBuf>> + 'a {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(e.into())),
                };
                if !entry.file_type().is_file() {
                    return None;
                }
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                if self.exclude_set.is_match(relative) {
                    return None;
                }
                Some(Ok(entry.into_path()))
            })
    }
}

/// Total size in bytes of the regular files under `root`.
pub fn directory_size(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() {
            let metadata = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
            total = total.saturating_add(metadata.len());
        }
    }
    Ok(total)
}

fn file_contains(path: &Path, needle: &str) -> Result<bool> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).contains(needle))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
