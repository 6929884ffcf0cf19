//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the host's ambient services.

/// dxLink WebSocket feed adapter.
pub mod dxlink;

/// History store adapters.
pub mod persistence;

/// Environment configuration and underlying presets.
pub mod config;

/// Health check, metrics and exposure HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
