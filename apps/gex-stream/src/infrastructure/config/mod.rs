//! Configuration Module
//!
//! Environment configuration and underlying presets for the stream service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_DXLINK_URL, DEFAULT_HISTORY_DIR, FeedSettings, HistorySettings, PRESETS, ServerSettings,
    StreamConfig, StreamSettings, UnderlyingPreset, preset_for,
};
