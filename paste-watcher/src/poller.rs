use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    dedup::DedupCache,
    metrics_consts::*,
    processor::ItemProcessor,
    source::{ItemSource, SourceError},
};

// The poller reports its own metrics, this is mostly for testing purposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    pub fetched: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The listing could not be fetched, nothing was looked at.
    Skipped,
    Completed(CycleStats),
}

impl CycleOutcome {
    pub fn processed(&self) -> usize {
        match self {
            CycleOutcome::Skipped => 0,
            CycleOutcome::Completed(stats) => stats.processed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_age: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<CycleOutcome>,
    pub cycles: u64,
    pub skipped: u64,
    pub cache_size: usize,
}

/// State shared between the poll loop and the http handlers.
#[derive(Debug)]
pub struct PollerState {
    started_at: DateTime<Utc>,
    liveness_deadline: Duration,
    status: Mutex<PollerStatus>,
}

impl PollerState {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            started_at: Utc::now(),
            liveness_deadline: poll_interval * 4,
            status: Mutex::new(PollerStatus::default()),
        }
    }

    pub async fn record(&self, outcome: CycleOutcome, cache_size: usize, now: DateTime<Utc>) {
        let mut status = self.status.lock().await;
        status.last_run = Some(now);
        status.last_outcome = Some(outcome);
        status.cycles += 1;
        if outcome == CycleOutcome::Skipped {
            status.skipped += 1;
        }
        status.cache_size = cache_size;
    }

    pub async fn snapshot(&self) -> PollerStatus {
        self.status.lock().await.clone()
    }

    /// Alive while the loop has reported within the deadline. Before the first report the
    /// deadline counts from startup.
    pub async fn is_alive(&self, now: DateTime<Utc>) -> bool {
        let last = self.status.lock().await.last_run.unwrap_or(self.started_at);
        match chrono::Duration::from_std(self.liveness_deadline) {
            Ok(deadline) => now.signed_duration_since(last) <= deadline,
            Err(_) => true,
        }
    }
}

pub struct Poller {
    source: Arc<dyn ItemSource>,
    processor: Arc<dyn ItemProcessor>,
    cache: Arc<DedupCache>,
    settings: PollSettings,
    state: Arc<PollerState>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn ItemSource>,
        processor: Arc<dyn ItemProcessor>,
        cache: Arc<DedupCache>,
        settings: PollSettings,
    ) -> Self {
        Self {
            source,
            processor,
            cache,
            settings,
            state: Arc::new(PollerState::new(settings.interval)),
        }
    }

    pub fn state(&self) -> Arc<PollerState> {
        self.state.clone()
    }

    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }

    /// Fetch one listing and hand every item not seen before to the processor. Every item
    /// that was attempted is marked, whether or not processing succeeded.
    pub async fn run_once(&self) -> CycleOutcome {
        info!("checking for new pastes");
        let start = std::time::Instant::now();
        metrics::counter!(CYCLE_STARTS).increment(1);

        let pastes = match self.source.fetch().await {
            Ok(pastes) => pastes,
            Err(SourceError::Parse { error, body }) => {
                error!(error = ?error, body = %body, "could not parse paste listing, skipping cycle");
                metrics::counter!(CYCLE_SKIPPED).increment(1);
                return CycleOutcome::Skipped;
            }
            Err(e) => {
                error!(error = ?e, "could not fetch paste listing, skipping cycle");
                metrics::counter!(CYCLE_SKIPPED).increment(1);
                return CycleOutcome::Skipped;
            }
        };

        let mut stats = CycleStats {
            fetched: pastes.len(),
            ..Default::default()
        };

        for paste in &pastes {
            if self.cache.seen(&paste.key) {
                stats.duplicates += 1;
                continue;
            }

            if self.processor.is_processed(paste).await {
                // Handled by an earlier run, remember it so the store is not asked again
                stats.duplicates += 1;
                self.cache.mark(paste.key.as_str(), Utc::now());
                continue;
            }

            match self.processor.download(paste).await {
                Ok(body) => match self.processor.process(paste, &body).await {
                    Ok(()) => stats.processed += 1,
                    Err(e) => {
                        warn!(key = %paste.key, error = ?e, "failed to process paste");
                        stats.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(key = %paste.key, error = ?e, "failed to download paste");
                    stats.failed += 1;
                }
            }

            self.cache.mark(paste.key.as_str(), Utc::now());
        }

        metrics::counter!(ITEMS_FETCHED).increment(stats.fetched as u64);
        metrics::counter!(ITEMS_PROCESSED).increment(stats.processed as u64);
        metrics::counter!(ITEMS_DUPLICATE).increment(stats.duplicates as u64);
        metrics::counter!(ITEMS_FAILED).increment(stats.failed as u64);
        metrics::gauge!(CACHE_SIZE).set(self.cache.len() as f64);
        metrics::histogram!(CYCLE_DURATION).record(start.elapsed().as_secs_f64());
        metrics::counter!(CYCLE_ENDS).increment(1);

        info!(
            fetched = stats.fetched,
            processed = stats.processed,
            duplicates = stats.duplicates,
            failed = stats.failed,
            "poll cycle complete"
        );

        CycleOutcome::Completed(stats)
    }

    /// Drop cache entries older than the retention window at `now`.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let evicted = self.cache.evict(now, self.settings.max_age);
        metrics::counter!(CACHE_EVICTED).increment(evicted as u64);
        metrics::gauge!(CACHE_SIZE).set(self.cache.len() as f64);

        if evicted > 0 {
            info!(evicted, remaining = self.cache.len(), "evicted stale paste keys");
        } else {
            debug!("no stale paste keys to evict");
        }
        evicted
    }

    /// Poll, sleep, evict. Forever.
    pub async fn run(self) {
        loop {
            let outcome = self.run_once().await;
            self.state
                .record(outcome, self.cache.len(), Utc::now())
                .await;

            tokio::time::sleep(self.settings.interval).await;
            self.evict(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_records_cycles() {
        let state = PollerState::new(Duration::from_secs(30));
        let now = Utc::now();

        state.record(CycleOutcome::Skipped, 0, now).await;
        let stats = CycleStats {
            fetched: 3,
            processed: 2,
            duplicates: 1,
            failed: 0,
        };
        state.record(CycleOutcome::Completed(stats), 2, now).await;

        let status = state.snapshot().await;
        assert_eq!(status.cycles, 2);
        assert_eq!(status.skipped, 1);
        assert_eq!(status.cache_size, 2);
        assert_eq!(status.last_outcome, Some(CycleOutcome::Completed(stats)));
        assert_eq!(status.last_run, Some(now));
    }

    #[tokio::test]
    async fn test_liveness_deadline() {
        let state = PollerState::new(Duration::from_secs(30));
        let now = Utc::now();
        assert!(state.is_alive(now).await);

        state.record(CycleOutcome::Skipped, 0, now).await;
        assert!(state.is_alive(now + chrono::Duration::seconds(120)).await);
        assert!(!state.is_alive(now + chrono::Duration::seconds(121)).await);
    }

    #[test]
    fn test_outcome_serialization() {
        let skipped = serde_json::to_value(CycleOutcome::Skipped).unwrap();
        assert_eq!(skipped, serde_json::json!({"status": "skipped"}));

        let completed = serde_json::to_value(CycleOutcome::Completed(CycleStats {
            fetched: 1,
            processed: 1,
            duplicates: 0,
            failed: 0,
        }))
        .unwrap();
        assert_eq!(completed["status"], "completed");
        assert_eq!(completed["processed"], 1);
    }
}
