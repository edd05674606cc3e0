//! Platform abstraction layer
//!
//! Handles browser/native differences for:
//! - Time (wall clock for save timestamps and auto-save pacing)
//! - Storage (LocalStorage on web, in-memory natively)
//! - The JS-facing save facade (web only)

pub mod storage;
pub mod time;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use storage::{MemoryStorage, StorageBackend, StorageError};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(target_arch = "wasm32")]
pub use storage::LocalStorage;
