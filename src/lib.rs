//! objsync - continuous directory-to-object-store sync
//!
//! Watches a local directory tree and mirrors file creation, modification,
//! and move events into an S3-compatible bucket in near-real time. Raw
//! filesystem events are debounced per path, deduplicated in a bounded
//! queue, and uploaded by a worker pool with retry and backoff.

pub mod coalesce;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod pool;
pub mod queue;
pub mod store;
pub mod types;
pub mod watch;

pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
