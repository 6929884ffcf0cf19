//! Application Services
//!
//! - `subscription`: strike ladder planning and center price resolution
//! - `reconnect`: exponential backoff between feed sessions
//! - `supervisor`: connection and dispatch tasks for one stream
//! - `history`: periodic persistence of the per-symbol merge buffer

pub mod history;
pub mod reconnect;
pub mod subscription;
pub mod supervisor;

pub use history::{HistoryRecorder, RestoredHistory, history_key};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use subscription::{CenterPrice, SubscriptionManager};
pub use supervisor::{
    EventDispatcher, SharedPending, StreamSupervisor, SupervisorConfig, SupervisorError,
    SupervisorEvent, SupervisorStats,
};
