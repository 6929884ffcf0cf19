//! File History Store
//!
//! One JSON file per entry:
//!
//! ```text
//! <root>/<key>/<YYYYMMDDTHHMMSSZ>.json
//! ```
//!
//! Characters outside `[A-Za-z0-9_-]` in the key become `_`, so
//! `SPX:251214` lives under `SPX_251214/`. Writes go to a dot-prefixed temp
//! file first and are renamed into place, so readers never see a partial
//! payload. Files whose names do not parse as timestamps are ignored.
//! Timestamps are kept to the second.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::fs;

use crate::application::ports::{HistoryError, HistoryStore};
use crate::domain::exposure::HistoryPayload;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const EXTENSION: &str = "json";

/// [`HistoryStore`] backed by a directory of JSON files.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    root: PathBuf,
}

impl FileHistoryStore {
    /// Use `root` as the store directory. It is created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(sanitized)
    }

    fn entry_path(&self, key: &str, timestamp: DateTime<Utc>) -> PathBuf {
        self.key_dir(key)
            .join(format!("{}.{EXTENSION}", timestamp.format(TIMESTAMP_FORMAT)))
    }
}

fn backend(context: &str, path: &Path, e: &std::io::Error) -> HistoryError {
    HistoryError::Backend(format!("{context} {}: {e}", path.display()))
}

fn timestamp_from_path(path: &Path) -> Option<DateTime<Utc>> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

async fn read_payload(path: &Path) -> Result<Option<HistoryPayload>, HistoryError> {
    match fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| HistoryError::Serialization(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(backend("read", path, &e)),
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
        payload: &HistoryPayload,
    ) -> Result<(), HistoryError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| backend("create", &dir, &e))?;

        let encoded =
            serde_json::to_vec(payload).map_err(|e| HistoryError::Serialization(e.to_string()))?;
        let path = self.entry_path(key, timestamp);
        let temp = dir.join(format!(".{}.tmp", timestamp.format(TIMESTAMP_FORMAT)));

        fs::write(&temp, &encoded)
            .await
            .map_err(|e| backend("write", &temp, &e))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| backend("rename", &path, &e))?;
        Ok(())
    }

    async fn list(&self, key: &str) -> Result<Vec<(DateTime<Utc>, HistoryPayload)>, HistoryError> {
        let dir = self.key_dir(key);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(backend("list", &dir, &e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| backend("list", &dir, &e))?
        {
            let path = entry.path();
            if let Some(timestamp) = timestamp_from_path(&path) {
                paths.push((timestamp, path));
            }
        }
        paths.sort_by_key(|(timestamp, _)| *timestamp);

        let mut listed = Vec::with_capacity(paths.len());
        for (timestamp, path) in paths {
            if let Some(payload) = read_payload(&path).await? {
                listed.push((timestamp, payload));
            }
        }
        Ok(listed)
    }

    async fn get(
        &self,
        key: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HistoryPayload>, HistoryError> {
        read_payload(&self.entry_path(key, timestamp)).await
    }
}
