use std::path::PathBuf;

use thiserror::Error;

/// A persisted artifact could not be read.  Always recovered locally: the
/// store falls back to a placeholder and the model is rebuilt.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path} is unavailable: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} has an inconsistent model: {source}")]
    Inconsistent {
        path: PathBuf,
        #[source]
        source: ModelShapeError,
    },
}

/// Structural problem in a deserialized model file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelShapeError {
    #[error("state size must be at least 1")]
    ZeroStateSize,
    #[error("state has {found} tokens, expected {expected}")]
    StateLength { expected: usize, found: usize },
    #[error("transition references record {index} but the model holds {records}")]
    DanglingSource { index: usize, records: usize },
}

/// Writing an artifact failed.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode artifact: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    /// The retry budget ran out before any sentence met the threshold.  Not a
    /// fault: the corpus simply cannot support output at this score yet.
    #[error("cannot build a sentence scoring at least {min_score} with the current corpus after {tries} tries")]
    CorpusInsufficient { tries: usize, min_score: u64 },
    #[error("a corpus regeneration is already running")]
    RegenerationInProgress,
    /// Pending buffers are left intact so the next regeneration retries the
    /// same work.
    #[error("corpus regeneration failed: {0}")]
    ReconciliationFault(#[from] PersistError),
}

impl CorpusError {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::CorpusInsufficient { .. })
    }
}
