//! History Persistence Adapters
//!
//! Implementations of the [`HistoryStore`](crate::application::ports::HistoryStore)
//! port: a JSON-file store that survives restarts and a process-local one.

mod file;
mod in_memory;

pub use file::FileHistoryStore;
pub use in_memory::InMemoryHistoryStore;
