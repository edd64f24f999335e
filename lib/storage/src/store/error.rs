use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Every way the sample store can fail. Inside the periodic tasks these are
/// logged and the tick is skipped; at startup they are fatal.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sample store path cannot be empty")]
    EmptyPath,

    #[error("I/O error on sample store `{path}`: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to encode sample record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Corrupt record at line {line} of `{path}`: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unrecognized store layout `{0}`")]
    UnknownLayout(String),

    #[error("Unsupported store layout version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Refusing to store non-finite {field} ({value})")]
    NonFinite { field: &'static str, value: f32 },

    #[error("Sample store still has {0} outstanding handle(s)")]
    InFlight(usize),
}

impl StoreError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &Path, line: usize, reason: impl ToString) -> StoreError {
        StoreError::Corrupt {
            path: path.to_path_buf(),
            line,
            reason: reason.to_string(),
        }
    }
}
