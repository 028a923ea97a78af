//! Core data types shared by the producer and consumer.
//!
//! These types represent the records that flow from code search into batch
//! files and from batch files into the scanning loop.

use serde::Deserialize;

/// One search hit, as stored in a batch file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct RepositoryRecord {
    pub name: String,
    pub stars: u64,
    pub url: String,
}

impl RepositoryRecord {
    pub fn new(name: impl Into<String>, stars: u64, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stars,
            url: url.into(),
        }
    }
}

/// Where a producer run starts: the position of the first term to search and
/// the index of the first batch file to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCursor {
    pub term_index: usize,
    pub batch_index: u64,
}

impl ResumeCursor {
    /// Resolve a starting term name against the term list.
    ///
    /// `None` starts at the first term. An unknown term yields `None` so the
    /// caller can reject it instead of silently skipping every term.
    pub fn resolve(terms: &[String], starting_point: Option<&str>, batch_index: u64) -> Option<Self> {
        let term_index = match starting_point {
            None => 0,
            Some(term) => terms.iter().position(|t| t == term)?,
        };
        Some(Self {
            term_index,
            batch_index,
        })
    }
}

/// Terminal state of one record in the scanning loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// URL was already in the processed set; nothing was acquired.
    AlreadyProcessed,
    /// Cloning failed, timed out, or collided with an existing directory.
    AcquireFailed,
    /// Content was larger than the ceiling or could not be measured.
    OversizeDiscarded,
    /// Content did not contain both markers (or could not be scanned).
    PredicateFailed,
    /// Content matched; carries the matching file paths written to the hits log.
    Retained(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> Vec<String> {
        vec!["alpha".into(), "beta".into(), "gamma".into()]
    }

    #[test]
    fn test_resolve_default_starts_at_zero() {
        let cursor = ResumeCursor::resolve(&terms(), None, 1).unwrap();
        assert_eq!(cursor.term_index, 0);
        assert_eq!(cursor.batch_index, 1);
    }

    #[test]
    fn test_resolve_named_term() {
        let cursor = ResumeCursor::resolve(&terms(), Some("gamma"), 7).unwrap();
        assert_eq!(cursor.term_index, 2);
        assert_eq!(cursor.batch_index, 7);
    }

    #[test]
    fn test_resolve_unknown_term() {
        assert!(ResumeCursor::resolve(&terms(), Some("delta"), 1).is_none());
    }
}
