//! Core types for the sync pipeline

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Kind of filesystem change entering the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// File created
    Created,
    /// File content changed
    Modified,
    /// File appeared as the target of a move/rename
    MovedTo,
    /// File or directory removed (or vacated by a rename)
    Removed,
    /// Directory created
    DirCreated,
    /// Directory appeared as the target of a move/rename
    DirMovedTo,
}

impl EventKind {
    /// Directory events bypass debouncing and trigger a bulk scan
    pub fn is_directory(&self) -> bool {
        matches!(self, EventKind::DirCreated | EventKind::DirMovedTo)
    }
}

/// A raw filesystem event, as delivered by the watcher bridge.
///
/// The event source may emit duplicates or reorder events within a short
/// window; the coalescer absorbs both.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub kind: EventKind,
    pub path: PathBuf,
    pub observed_at: Instant,
}

impl RawEvent {
    pub fn new(kind: EventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Instant::now(),
        }
    }
}

/// A settled unit of upload work for one path.
///
/// Clones share the cancellation flag, so a delete observed after the intent
/// was dequeued still suppresses the upload before it starts.
#[derive(Debug, Clone)]
pub struct UploadIntent {
    pub path: PathBuf,
    pub key: String,
    pub enqueued_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl UploadIntent {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
            enqueued_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Retry/backoff tuning for upload attempts.
///
/// Defaults: 5 attempts, 500ms base, x2 per attempt, 30s cap, +/-20% jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per intent, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second attempt, in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Multiplier applied per subsequent attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    /// Upper bound on a single backoff delay, in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying after `attempt` failures, with +/-20%
    /// jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let exp = self.backoff_factor.saturating_pow(attempt.saturating_sub(1)) as u64;
        let base = self
            .backoff_base_ms
            .saturating_mul(exp)
            .min(self.backoff_cap_ms);
        let jitter = base / 5;
        let low = base.saturating_sub(jitter);
        let ms = rand::thread_rng().gen_range(low..=base.saturating_add(jitter));
        Duration::from_millis(ms)
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory tree to watch (recursive)
    pub root: PathBuf,
    /// Target bucket name
    pub bucket: String,
    /// Key prefix prepended to every storage key
    #[serde(default)]
    pub key_prefix: String,
    /// Quiet period before a changed path is considered settled, in
    /// milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upload worker count (0 = number of cores, minimum 2)
    #[serde(default)]
    pub workers: usize,
    /// Per-attempt upload timeout in seconds
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// Maximum distinct paths queued before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Ceiling on files enqueued from a single directory-creation scan
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_scan_limit() -> usize {
    10_000
}

impl SyncConfig {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            key_prefix: String::new(),
            debounce_ms: default_debounce_ms(),
            workers: 0,
            attempt_timeout_secs: default_attempt_timeout_secs(),
            queue_capacity: default_queue_capacity(),
            scan_limit: default_scan_limit(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    /// Resolved worker count: configured value, or available cores clamped
    /// to a minimum of 2
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .max(2)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(SyncError::Config("bucket name is empty".to_string()));
        }
        if !self.root.is_dir() {
            return Err(SyncError::Config(format!(
                "watch root {} is not a directory",
                self.root.display()
            )));
        }
        if self.queue_capacity == 0 {
            return Err(SyncError::Config("queue capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    Running,
    Draining,
}

/// Pollable health snapshot for external monitoring
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: EngineState,
    pub queue_depth: usize,
    pub active_workers: usize,
    pub uploaded: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_clones_share_cancellation() {
        let intent = UploadIntent::new("/data/a.txt", "a.txt");
        let clone = intent.clone();
        assert!(!clone.is_cancelled());
        intent.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();

        // +/-20% jitter bounds around 500ms, 1s, 2s...
        for attempt in 1..=4u32 {
            let base = 500u64 * 2u64.pow(attempt - 1);
            let delay = policy.delay_after(attempt).as_millis() as u64;
            assert!(delay >= base - base / 5, "attempt {attempt}: {delay}");
            assert!(delay <= base + base / 5, "attempt {attempt}: {delay}");
        }

        // Far past the cap the delay stays bounded
        let delay = policy.delay_after(20).as_millis() as u64;
        assert!(delay <= 30_000 + 30_000 / 5);
    }

    #[test]
    fn effective_workers_minimum() {
        let mut config = SyncConfig::new("/tmp", "bucket");
        assert!(config.effective_workers() >= 2);
        config.workers = 1;
        assert_eq!(config.effective_workers(), 1);
    }
}
