//! Domain Layer - Option symbols, feed events and exposure aggregation.
//!
//! Pure types and logic with no I/O. The application layer drives these from
//! feed sessions; the infrastructure layer decodes wire frames into them.

/// Option symbol parsing, formatting and strike ladders.
pub mod symbol;

/// Normalized feed events, connection state and feed errors.
pub mod feed;

/// Gamma exposure aggregation and per-contract merge buffer.
pub mod exposure;
