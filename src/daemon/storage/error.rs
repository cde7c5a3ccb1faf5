use std::path::PathBuf;

use thiserror::Error;

/// Failure inside the persistence layer. Always recoverable: callers log it and carry on with
/// in-memory state.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file {path:?} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialize(#[source] serde_json::Error),
}
