//! Stream Configuration Settings
//!
//! Configuration types for the gamma exposure stream, loaded from
//! environment variables. Optional values that are missing or do not parse
//! fall back to their defaults; semantic validation of the stream
//! parameters happens in [`SupervisorConfig::validate`].

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::{ReconnectConfig, SupervisorConfig};
use crate::domain::exposure::ExposureConfig;
use crate::domain::symbol::LadderSpec;
use crate::infrastructure::dxlink::{DxLinkConfig, KeepaliveConfig};

/// Default dxLink endpoint.
pub const DEFAULT_DXLINK_URL: &str = "wss://tasty-openapi-ws.dxfeed.com/realtime";

// =============================================================================
// Underlying Presets
// =============================================================================

/// Option root, strike spacing and fallback center for a known underlying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnderlyingPreset {
    /// Underlying ticker.
    pub underlying: &'static str,
    /// Option root prefix.
    pub option_prefix: &'static str,
    /// Strike increment.
    pub strike_increment: u32,
    /// Center price used when no quote arrives.
    pub fallback_price: u32,
}

/// Known underlyings.
pub const PRESETS: [UnderlyingPreset; 6] = [
    UnderlyingPreset {
        underlying: "SPX",
        option_prefix: "SPXW",
        strike_increment: 5,
        fallback_price: 6000,
    },
    UnderlyingPreset {
        underlying: "NDX",
        option_prefix: "NDXP",
        strike_increment: 25,
        fallback_price: 20000,
    },
    UnderlyingPreset {
        underlying: "SPY",
        option_prefix: "SPY",
        strike_increment: 1,
        fallback_price: 680,
    },
    UnderlyingPreset {
        underlying: "QQQ",
        option_prefix: "QQQ",
        strike_increment: 1,
        fallback_price: 612,
    },
    UnderlyingPreset {
        underlying: "IWM",
        option_prefix: "IWM",
        strike_increment: 1,
        fallback_price: 240,
    },
    UnderlyingPreset {
        underlying: "DIA",
        option_prefix: "DIA",
        strike_increment: 1,
        fallback_price: 450,
    },
];

/// Look up a preset by ticker.
#[must_use]
pub fn preset_for(underlying: &str) -> Option<&'static UnderlyingPreset> {
    PRESETS.iter().find(|p| p.underlying == underlying)
}

// =============================================================================
// Settings
// =============================================================================

/// Feed endpoint and connection timing.
#[derive(Clone)]
pub struct FeedSettings {
    /// WebSocket URL.
    pub url: String,
    token: String,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Per-step handshake timeout.
    pub handshake_timeout: Duration,
    /// Interval between client keepalives.
    pub keepalive_interval: Duration,
    /// Silence tolerated before the session fails.
    pub keepalive_timeout: Duration,
}

impl FeedSettings {
    /// Streamer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for FeedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSettings")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("keepalive_timeout", &self.keepalive_timeout)
            .finish()
    }
}

/// What to stream.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Underlying ticker.
    pub underlying: String,
    /// Option root prefix.
    pub option_prefix: String,
    /// Strike increment.
    pub strike_increment: Decimal,
    /// Center price used when no quote arrives.
    pub fallback_price: Decimal,
    /// Expiration in `YYMMDD` form.
    pub expiration: String,
    /// Strikes above center.
    pub strikes_up: u32,
    /// Strikes below center.
    pub strikes_down: u32,
    /// Wait for an underlying quote after connecting.
    pub price_timeout: Duration,
    /// Event channel capacity in batches.
    pub event_channel_capacity: usize,
}

/// Exposure history and persistence timing.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    /// Snapshots older than this are pruned.
    pub retention: Duration,
    /// Minimum spacing between snapshots.
    pub snapshot_interval: Duration,
    /// Maximum retained snapshots.
    pub capacity: usize,
    /// How often the merge buffer is persisted.
    pub record_interval: Duration,
    /// Directory for persisted history. `None` keeps history in memory.
    pub directory: Option<PathBuf>,
}

/// Default history directory, relative to the working directory.
pub const DEFAULT_HISTORY_DIR: &str = "data/history";

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            snapshot_interval: Duration::from_secs(5),
            capacity: 720,
            record_interval: Duration::from_secs(60),
            directory: Some(PathBuf::from(DEFAULT_HISTORY_DIR)),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health, metrics and exposure HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Feed endpoint.
    pub feed: FeedSettings,
    /// Stream parameters.
    pub stream: StreamSettings,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// History settings.
    pub history: HistorySettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `DXLINK_TOKEN` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `DXLINK_TOKEN` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let token = env
            .get("DXLINK_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("DXLINK_TOKEN".to_string()))?;
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyValue("DXLINK_TOKEN".to_string()));
        }

        let feed = FeedSettings {
            url: env
                .get("DXLINK_URL")
                .unwrap_or_else(|| DEFAULT_DXLINK_URL.to_string()),
            token,
            connect_timeout: env.secs("DXLINK_CONNECT_TIMEOUT_SECS", Duration::from_secs(10)),
            handshake_timeout: env.secs("DXLINK_HANDSHAKE_TIMEOUT_SECS", Duration::from_secs(10)),
            keepalive_interval: env.secs("DXLINK_KEEPALIVE_INTERVAL_SECS", Duration::from_secs(30)),
            keepalive_timeout: env.secs("DXLINK_KEEPALIVE_TIMEOUT_SECS", Duration::from_secs(60)),
        };

        let underlying = env
            .get("GEX_UNDERLYING")
            .map(|u| u.trim().to_uppercase())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "SPX".to_string());
        let preset = preset_for(&underlying);

        let stream = StreamSettings {
            option_prefix: env.get("GEX_OPTION_PREFIX").unwrap_or_else(|| {
                preset.map_or_else(|| underlying.clone(), |p| p.option_prefix.to_string())
            }),
            strike_increment: env.parsed(
                "GEX_STRIKE_INCREMENT",
                Decimal::from(preset.map_or(1, |p| p.strike_increment)),
            ),
            fallback_price: env.parsed(
                "GEX_FALLBACK_PRICE",
                Decimal::from(preset.map_or(1000, |p| p.fallback_price)),
            ),
            expiration: env
                .get("GEX_EXPIRATION")
                .unwrap_or_else(|| chrono::Local::now().format("%y%m%d").to_string()),
            strikes_up: env.parsed("GEX_STRIKES_UP", 25),
            strikes_down: env.parsed("GEX_STRIKES_DOWN", 25),
            price_timeout: env.secs("GEX_PRICE_TIMEOUT_SECS", Duration::from_secs(5)),
            event_channel_capacity: env.parsed("GEX_EVENT_CHANNEL_CAPACITY", 4096),
            underlying,
        };

        let reconnect_defaults = ReconnectConfig::default();
        let reconnect = ReconnectConfig {
            initial_delay: env.secs("GEX_RECONNECT_INITIAL_SECS", reconnect_defaults.initial_delay),
            max_delay: env.secs("GEX_RECONNECT_MAX_SECS", reconnect_defaults.max_delay),
            multiplier: env.parsed("GEX_RECONNECT_MULTIPLIER", reconnect_defaults.multiplier),
            jitter_factor: reconnect_defaults.jitter_factor,
            max_attempts: env.parsed("GEX_MAX_RECONNECT_ATTEMPTS", reconnect_defaults.max_attempts),
        };

        let history_defaults = HistorySettings::default();
        let history = HistorySettings {
            retention: env.secs("GEX_HISTORY_RETENTION_SECS", history_defaults.retention),
            snapshot_interval: env.secs(
                "GEX_SNAPSHOT_INTERVAL_SECS",
                history_defaults.snapshot_interval,
            ),
            capacity: env.parsed("GEX_HISTORY_CAPACITY", history_defaults.capacity),
            record_interval: env.secs("GEX_RECORD_INTERVAL_SECS", history_defaults.record_interval),
            directory: match env.get("GEX_HISTORY_DIR") {
                Some(dir) if dir.trim().is_empty() => None,
                Some(dir) => Some(PathBuf::from(dir.trim())),
                None => history_defaults.directory,
            },
        };

        let server = ServerSettings {
            health_port: env.parsed("GEX_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            feed,
            stream,
            reconnect,
            history,
            server,
        })
    }

    /// dxLink connection settings.
    #[must_use]
    pub fn dxlink_config(&self) -> DxLinkConfig {
        DxLinkConfig {
            url: self.feed.url.clone(),
            connect_timeout: self.feed.connect_timeout,
            handshake_timeout: self.feed.handshake_timeout,
            keepalive: KeepaliveConfig {
                interval: self.feed.keepalive_interval,
                timeout: self.feed.keepalive_timeout,
            },
        }
    }

    /// Supervisor parameters.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            underlying: self.stream.underlying.clone(),
            ladder: LadderSpec {
                prefix: self.stream.option_prefix.clone(),
                expiration: self.stream.expiration.clone(),
                strikes_up: self.stream.strikes_up,
                strikes_down: self.stream.strikes_down,
                increment: self.stream.strike_increment,
            },
            fallback_price: self.stream.fallback_price,
            price_timeout: self.stream.price_timeout,
            reconnect: self.reconnect.clone(),
            event_channel_capacity: self.stream.event_channel_capacity,
            join_timeout: SupervisorConfig::DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Aggregator history settings.
    #[must_use]
    pub const fn exposure_config(&self) -> ExposureConfig {
        ExposureConfig {
            history_capacity: self.history.capacity,
            history_retention: self.history.retention,
            snapshot_interval: self.history.snapshot_interval,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }
}
