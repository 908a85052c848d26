use std::path::PathBuf;

use thiserror::Error;

/// Storage errors of the offline queue.
///
/// None of these ever reach the decision path: a failed write is logged and
/// the in-memory queue stays authoritative for the running process.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the queue file failed
    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The queue file is not a valid queue document
    #[error("Invalid queue file: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
