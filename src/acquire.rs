//! Repository acquisition into scratch directories.
//!
//! [`Acquirer`] is the seam between the consumer and the version-control
//! fetch. [`GitAcquirer`] shells out to `git clone`, bounded by a timeout: a
//! clone that hangs is killed and reported as [`AcquireError::Timeout`]
//! instead of stalling the consumer.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::RepositoryRecord;

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
    #[error("failed to execute 'git clone'. Is git installed? ({0})")]
    Spawn(#[source] std::io::Error),
    #[error("git clone failed: {0}")]
    Failed(String),
    #[error("git clone timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Fetch the repository at `url` into `dest`, which must not exist yet.
    async fn acquire(&self, url: &str, dest: &Path) -> Result<(), AcquireError>;
}

pub struct GitAcquirer {
    program: PathBuf,
    shallow: bool,
    timeout: Duration,
}

impl GitAcquirer {
    /// Clone with the `git` found on `PATH`.
    pub fn new(shallow: bool, timeout: Duration) -> Self {
        Self::with_program("git", shallow, timeout)
    }

    /// Clone with a specific git executable.
    pub fn with_program(program: impl Into<PathBuf>, shallow: bool, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            shallow,
            timeout,
        }
    }
}

#[async_trait]
impl Acquirer for GitAcquirer {
    async fn acquire(&self, url: &str, dest: &Path) -> Result<(), AcquireError> {
        if dest.exists() {
            return Err(AcquireError::AlreadyExists(dest.to_path_buf()));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(AcquireError::Spawn)?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(["clone", "--quiet"]);
        if self.shallow {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(clone_url(url))
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(AcquireError::Spawn)?,
            Err(_) => return Err(AcquireError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquireError::Failed(stderr.trim().to_string()));
        }

        Ok(())
    }
}

/// `https://github.com/o/r` → `https://github.com/o/r.git`.
fn clone_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.ends_with(".git") {
        url.to_string()
    } else {
        format!("{}.git", url)
    }
}

/// Scratch location for a record: `<scratch_dir>/<name>-<hash of url>`.
///
/// The hash keeps two repositories with the same name apart.
pub fn scratch_path(scratch_dir: &Path, record: &RepositoryRecord) -> PathBuf {
    let name: String = record
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = name.trim_start_matches('.');
    scratch_dir.join(format!("{}-{}", name, short_hash(&record.url)))
}

/// Remove a scratch directory. A directory that is already gone is fine.
pub fn discard(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}
