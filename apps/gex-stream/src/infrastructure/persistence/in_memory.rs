//! In-Memory History Store
//!
//! Keeps payloads as encoded JSON so that anything stored here would also
//! survive a round trip through a durable backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{HistoryError, HistoryStore};
use crate::domain::exposure::HistoryPayload;

type Entries = BTreeMap<String, BTreeMap<DateTime<Utc>, String>>;

/// Process-local [`HistoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<Entries>,
}

impl InMemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries stored under `key`.
    #[must_use]
    pub fn len(&self, key: &str) -> usize {
        self.entries.read().get(key).map_or(0, BTreeMap::len)
    }

    /// Whether nothing is stored under `key`.
    #[must_use]
    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }
}

fn decode(encoded: &str) -> Result<HistoryPayload, HistoryError> {
    serde_json::from_str(encoded).map_err(|e| HistoryError::Serialization(e.to_string()))
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        payload: &HistoryPayload,
    ) -> Result<(), HistoryError> {
        let encoded =
            serde_json::to_string(payload).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        self.entries
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(timestamp, encoded);
        Ok(())
    }

    async fn list(&self, key: &str) -> Result<Vec<(DateTime<Utc>, HistoryPayload)>, HistoryError> {
        let encoded: Vec<(DateTime<Utc>, String)> = self
            .entries
            .read()
            .get(key)
            .map(|series| series.iter().map(|(ts, e)| (*ts, e.clone())).collect())
            .unwrap_or_default();

        encoded
            .into_iter()
            .map(|(ts, e)| decode(&e).map(|payload| (ts, payload)))
            .collect()
    }

    async fn get(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HistoryPayload>, HistoryError> {
        let encoded = self
            .entries
            .read()
            .get(key)
            .and_then(|series| series.get(&timestamp).cloned());
        encoded.as_deref().map(decode).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::exposure::OptionMarketData;

    fn payload(gamma: f64) -> HistoryPayload {
        let mut payload = HistoryPayload::new();
        payload.insert(
            ".SPXW251214C6000".to_string(),
            OptionMarketData {
                gamma: Some(gamma),
                open_interest: Some(1000.0),
                ..OptionMarketData::default()
            },
        );
        payload
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 14, 15, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn list_is_ascending_and_scoped_by_key() {
        let store = InMemoryHistoryStore::new();
        store.save("SPX:251214", at(2), &payload(0.02)).await.unwrap();
        store.save("SPX:251214", at(1), &payload(0.01)).await.unwrap();
        store.save("NDX:251214", at(1), &payload(0.05)).await.unwrap();

        let listed = store.list("SPX:251214").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, at(1));
        assert_eq!(listed[1].1, payload(0.02));
        assert!(store.list("QQQ:251214").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_replaces_same_timestamp() {
        let store = InMemoryHistoryStore::new();
        store.save("SPX:251214", at(1), &payload(0.01)).await.unwrap();
        store.save("SPX:251214", at(1), &payload(0.03)).await.unwrap();

        assert_eq!(store.len("SPX:251214"), 1);
        assert_eq!(
            store.get("SPX:251214", at(1)).await.unwrap(),
            Some(payload(0.03))
        );
        assert_eq!(store.get("SPX:251214", at(5)).await.unwrap(), None);
    }
}
