use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kv_store::{KvStore, StoreError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::source::Paste;

pub const PASTES_BUCKET: &str = "pastes";

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("paste {0} has no scrape url")]
    MissingUrl(String),
    #[error("download of {key} failed: {error}")]
    Download {
        key: String,
        #[source]
        error: reqwest::Error,
    },
    #[error("download of {key} responded with status {status}")]
    Status { key: String, status: StatusCode },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Handles each new item the poll loop discovers. Failures are reported back to the loop,
/// which logs them and moves on to the next item.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Whether this item was handled by an earlier run. Lets a restarted watcher skip items
    /// its in-memory cache has forgotten.
    async fn is_processed(&self, _paste: &Paste) -> bool {
        false
    }

    async fn download(&self, paste: &Paste) -> Result<String, ProcessorError>;

    async fn process(&self, paste: &Paste, body: &str) -> Result<(), ProcessorError>;
}

/// Summary of a processed paste as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedPaste {
    pub key: String,
    pub title: String,
    pub syntax: String,
    pub user: String,
    pub size_bytes: usize,
    pub lines: usize,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedPaste {
    pub fn summarize(paste: &Paste, body: &str, processed_at: DateTime<Utc>) -> Self {
        Self {
            key: paste.key.clone(),
            title: paste.title.clone(),
            syntax: paste.syntax.clone(),
            user: paste.user.clone(),
            size_bytes: body.len(),
            lines: body.lines().count(),
            processed_at,
        }
    }
}

/// Downloads the raw paste body and records a [`ProcessedPaste`] keyed by the paste key.
pub struct StoringProcessor {
    client: Client,
    store: Arc<KvStore>,
    bucket: String,
}

impl StoringProcessor {
    pub fn new(client: Client, store: Arc<KvStore>) -> Self {
        Self::with_bucket(client, store, PASTES_BUCKET)
    }

    pub fn with_bucket(client: Client, store: Arc<KvStore>, bucket: impl Into<String>) -> Self {
        Self {
            client,
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store calls may fsync, so they run on the blocking pool rather than a runtime worker.
    async fn blocking<T, F>(&self, f: F) -> Result<T, ProcessorError>
    where
        T: Send + 'static,
        F: FnOnce(&KvStore) -> kv_store::Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let value = tokio::task::spawn_blocking(move || f(&store)).await??;
        Ok(value)
    }
}

#[async_trait]
impl ItemProcessor for StoringProcessor {
    async fn is_processed(&self, paste: &Paste) -> bool {
        let bucket = self.bucket.clone();
        let key = paste.key.clone();
        let lookup = self.blocking(move |store| store.contains(&bucket, &key));

        match lookup.await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %paste.key, error = ?e, "could not check store for paste");
                false
            }
        }
    }

    async fn download(&self, paste: &Paste) -> Result<String, ProcessorError> {
        if paste.scrape_url.is_empty() {
            return Err(ProcessorError::MissingUrl(paste.key.clone()));
        }

        let download_error = |error| ProcessorError::Download {
            key: paste.key.clone(),
            error,
        };

        let response = self
            .client
            .get(&paste.scrape_url)
            .send()
            .await
            .map_err(download_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Status {
                key: paste.key.clone(),
                status,
            });
        }

        response.text().await.map_err(download_error)
    }

    async fn process(&self, paste: &Paste, body: &str) -> Result<(), ProcessorError> {
        let summary = ProcessedPaste::summarize(paste, body, Utc::now());
        let bucket = self.bucket.clone();
        self.blocking(move |store| store.put(&bucket, &summary.key, &summary))
            .await
    }
}
