use thiserror::Error;

use crate::storage::StorageError;

/// Failure to persist a cache entry. Callers log these and carry on in
/// online-only mode for the affected payload.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to write cache entry {key}: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to serialize cache entry {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            CacheError::StorageWrite {
                source: StorageError::QuotaExceeded { .. },
                ..
            }
        )
    }
}
