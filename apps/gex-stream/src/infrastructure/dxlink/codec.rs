//! dxLink JSON Codec
//!
//! Text frames carry exactly one JSON object. Decoding keeps unknown frame
//! types as [`DxLinkMessage::Unknown`] so newer servers do not break the
//! session.

use super::messages::DxLinkMessage;
use crate::domain::feed::{FeedError, FeedEvent};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was not a JSON object.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

impl From<CodecError> for FeedError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

/// JSON codec for dxLink frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, message: &DxLinkMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object or does not match
    /// any known frame shape.
    pub fn decode(&self, text: &str) -> Result<DxLinkMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}..."
            )));
        }
        Ok(serde_json::from_str(trimmed)?)
    }

    /// Decode the events of a `FEED_DATA` frame, dropping unusable entries.
    #[must_use]
    pub fn feed_events(&self, message: DxLinkMessage) -> Vec<FeedEvent> {
        match message {
            DxLinkMessage::FeedData { data, .. } => {
                data.into_iter().filter_map(|p| p.into_event()).collect()
            }
            _ => Vec::new(),
        }
    }
}
