use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Enumeration of errors returned by the store.
/// Engine errors come from RocksDB and are surfaced as-is; the store never retries or logs them.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("key {key:?} not found in bucket {bucket:?}")]
    NotFound { bucket: String, key: String },
    #[error("bucket {0:?} does not exist")]
    BucketNotFound(String),
    #[error("refusing to store an absent value")]
    BadValue,
    #[error("store is closed")]
    Closed,
    #[error("timed out after {timeout:?} waiting for the lock on {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("storage engine failed with: {0}")]
    Engine(#[from] rocksdb::Error),
    #[error("io error on {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode value: {0}")]
    Decode(String),
    #[error("{0} is not a valid codec")]
    UnknownCodec(String),
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        }
    }

    /// True for the outcomes callers are expected to branch on rather than treat as faults.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::BucketNotFound(_)
        )
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
