//! History Persistence Integration Tests
//!
//! Records the merge buffer to the file store, then restores it through a
//! fresh store and aggregator as a restarted process would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::tempdir;

use gex_stream::application::ports::HistoryStore;
use gex_stream::{
    ExposureAggregator, ExposureConfig, FeedEvent, FileHistoryStore, HistoryRecorder,
    PendingUpdates,
};

fn greeks(symbol: &str, gamma: f64) -> FeedEvent {
    FeedEvent::Greeks {
        symbol: symbol.to_string(),
        gamma: Some(gamma),
        delta: Some(0.5),
        volatility: Some(0.2),
    }
}

fn summary(symbol: &str, open_interest: f64) -> FeedEvent {
    FeedEvent::Summary {
        symbol: symbol.to_string(),
        open_interest: Some(open_interest),
    }
}

#[tokio::test]
async fn restart_restores_exposure_and_merge_buffer() {
    let dir = tempdir().unwrap();

    let mut pending = PendingUpdates::new();
    for event in [
        greeks(".SPXW251214C6000", 0.01),
        summary(".SPXW251214C6000", 1000.0),
        greeks(".SPXW251214P5995", 0.02),
        summary(".SPXW251214P5995", 500.0),
        greeks(".SPXW251214C6005", 0.03),
    ] {
        let _ = pending.apply(&event);
    }

    let first_run: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::new(dir.path()));
    let recorder = HistoryRecorder::new(first_run, "SPX", "251214");
    let recorded_at = Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 17).unwrap();
    let stored = recorder
        .record(&pending.to_payload(), recorded_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, Utc.with_ymd_and_hms(2025, 12, 14, 15, 30, 0).unwrap());

    let second_run: Arc<dyn HistoryStore> = Arc::new(FileHistoryStore::new(dir.path()));
    let recorder = HistoryRecorder::new(second_run, "SPX", "251214");
    let aggregator = ExposureAggregator::new(6000.0, ExposureConfig::default());
    let restored = recorder.restore_latest(&aggregator).await.unwrap().unwrap();

    assert_eq!(restored.timestamp, stored);
    assert_eq!(restored.applied, 2);
    assert_eq!(aggregator.summary_metrics().tracked_option_count, 2);
    assert_eq!(recorder.timestamps().await.unwrap(), vec![stored]);

    let mut rebuilt = PendingUpdates::new();
    assert_eq!(rebuilt.seed(&restored.payload), 3);

    // The partial contract completes once its open interest arrives.
    let ready = rebuilt.apply(&summary(".SPXW251214C6005", 200.0)).unwrap();
    assert_eq!(ready.gamma, 0.03);
    assert_eq!(ready.open_interest, 200.0);
}
