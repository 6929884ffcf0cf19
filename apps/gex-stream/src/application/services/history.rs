//! History Recorder
//!
//! Periodically persists the per-symbol merge buffer so exposure can be
//! rebuilt after a restart or inspected later. Entries are keyed by
//! underlying and expiration and stamped to the minute, so repeated writes
//! within one minute replace each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use super::supervisor::SharedPending;
use crate::application::ports::{HistoryError, HistoryStore};
use crate::domain::exposure::{ExposureAggregator, HistoryPayload};

/// Latest stored payload and what replaying it did.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredHistory {
    /// Timestamp of the stored entry.
    pub timestamp: DateTime<Utc>,
    /// Options applied to the aggregator.
    pub applied: usize,
    /// The stored payload, for seeding a fresh merge buffer.
    pub payload: HistoryPayload,
}

/// Writes merge-buffer snapshots to a [`HistoryStore`].
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    key: String,
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Store key for an underlying and expiration.
#[must_use]
pub fn history_key(underlying: &str, expiration: &str) -> String {
    format!("{underlying}:{expiration}")
}

fn truncate_to_minute(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(timestamp)
}

impl HistoryRecorder {
    /// Create a recorder for one underlying and expiration.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, underlying: &str, expiration: &str) -> Self {
        Self {
            store,
            key: history_key(underlying, expiration),
        }
    }

    /// Store key used by this recorder.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Save `payload` stamped with `now` truncated to the minute.
    ///
    /// Empty payloads are not written. Returns the stored timestamp.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn record(
        &self,
        payload: &HistoryPayload,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, HistoryError> {
        if payload.is_empty() {
            return Ok(None);
        }
        let timestamp = truncate_to_minute(now);
        self.store.save(&self.key, timestamp, payload).await?;
        tracing::debug!(key = %self.key, %timestamp, symbols = payload.len(), "Recorded history");
        Ok(Some(timestamp))
    }

    /// Replay the most recent stored payload into `aggregator`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn restore_latest(
        &self,
        aggregator: &ExposureAggregator,
    ) -> Result<Option<RestoredHistory>, HistoryError> {
        let mut entries = self.store.list(&self.key).await?;
        let Some((timestamp, payload)) = entries.pop() else {
            return Ok(None);
        };
        let applied = aggregator.replay(&payload);
        tracing::info!(key = %self.key, %timestamp, applied, "Restored exposure from history");
        Ok(Some(RestoredHistory {
            timestamp,
            applied,
            payload,
        }))
    }

    /// Timestamps of all stored entries, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn timestamps(&self) -> Result<Vec<DateTime<Utc>>, HistoryError> {
        let entries = self.store.list(&self.key).await?;
        Ok(entries.into_iter().map(|(timestamp, _)| timestamp).collect())
    }

    /// The entry stored at `timestamp`, if any.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn load(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HistoryPayload>, HistoryError> {
        self.store.get(&self.key, timestamp).await
    }

    /// Record the shared buffer every `interval` until cancelled.
    ///
    /// Store failures are logged and retried on the next tick.
    pub async fn run(self, pending: SharedPending, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let payload = pending.lock().to_payload();
            if let Err(e) = self.record(&payload, Utc::now()).await {
                tracing::warn!(key = %self.key, error = %e, "Failed to record history");
            }
        }

        let payload = pending.lock().to_payload();
        if let Err(e) = self.record(&payload, Utc::now()).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to record final history");
        }
        tracing::debug!(key = %self.key, "History recorder stopped");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::application::ports::MockHistoryStore;
    use crate::domain::exposure::{ExposureConfig, OptionMarketData};

    fn payload() -> HistoryPayload {
        let mut payload = HistoryPayload::new();
        payload.insert(
            ".SPXW251214C100".to_string(),
            OptionMarketData {
                gamma: Some(1.0),
                open_interest: Some(2.0),
                ..OptionMarketData::default()
            },
        );
        payload
    }

    #[tokio::test]
    async fn record_truncates_to_minute() {
        let now = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 42).unwrap();
        let minute = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap();

        let mut store = MockHistoryStore::new();
        store
            .expect_save()
            .withf(move |key, ts, data| {
                key.to_string() == "SPX:251214" && *ts == minute && data.len() == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        let stored = recorder.record(&payload(), now).await.unwrap();
        assert_eq!(stored, Some(minute));
    }

    #[tokio::test]
    async fn record_skips_empty_payload() {
        let mut store = MockHistoryStore::new();
        store.expect_save().never();

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        let stored = recorder.record(&HistoryPayload::new(), Utc::now()).await;
        assert_eq!(tokio_test::assert_ok!(stored), None);
    }

    #[tokio::test]
    async fn record_propagates_store_failure() {
        let mut store = MockHistoryStore::new();
        store
            .expect_save()
            .returning(|_, _, _| Err(HistoryError::Backend("disk full".to_string())));

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        let result = recorder.record(&payload(), Utc::now()).await;
        tokio_test::assert_err!(result);
    }

    #[tokio::test]
    async fn restore_replays_latest_entry() {
        let older = Utc.with_ymd_and_hms(2025, 12, 14, 15, 29, 0).unwrap();
        let latest = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap();

        let mut store = MockHistoryStore::new();
        store
            .expect_list()
            .withf(|key| key.to_string() == "SPX:251214")
            .returning(move |_| Ok(vec![(older, HistoryPayload::new()), (latest, payload())]));

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        let aggregator = ExposureAggregator::new(1.0, ExposureConfig::default());
        let restored = recorder.restore_latest(&aggregator).await.unwrap().unwrap();

        assert_eq!(restored.timestamp, latest);
        assert_eq!(restored.applied, 1);
        assert_eq!(restored.payload, payload());
        assert_eq!(aggregator.summary_metrics().tracked_option_count, 1);
    }

    #[tokio::test]
    async fn browse_lists_and_loads_by_timestamp() {
        let first = Utc.with_ymd_and_hms(2025, 12, 14, 15, 29, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap();

        let mut store = MockHistoryStore::new();
        store
            .expect_list()
            .returning(move |_| Ok(vec![(first, payload()), (second, payload())]));
        store
            .expect_get()
            .withf(move |key, ts| key.to_string() == "SPX:251214" && *ts == second)
            .returning(|_, _| Ok(Some(payload())));

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        assert_eq!(recorder.timestamps().await.unwrap(), vec![first, second]);
        assert_eq!(recorder.load(second).await.unwrap(), Some(payload()));
    }

    #[tokio::test]
    async fn restore_with_empty_store() {
        let mut store = MockHistoryStore::new();
        store.expect_list().returning(|_| Ok(Vec::new()));

        let recorder = HistoryRecorder::new(Arc::new(store), "SPX", "251214");
        let aggregator = ExposureAggregator::new(1.0, ExposureConfig::default());
        assert_eq!(recorder.restore_latest(&aggregator).await.unwrap(), None);
    }
}
