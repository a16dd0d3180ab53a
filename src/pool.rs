//! Upload worker pool
//!
//! A fixed-size set of tokio tasks drains the queue with bounded
//! parallelism. Each worker performs one upload at a time, retrying
//! transient failures with jittered exponential backoff. A per-path claim
//! table guarantees no two workers ever upload the same path concurrently,
//! which keeps per-path uploads ordered by observation time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::queue::UploadQueue;
use crate::store::ObjectStore;
use crate::types::{RetryPolicy, UploadIntent};

struct Claim {
    intent: UploadIntent,
    deferred: Option<UploadIntent>,
}

/// Per-path in-flight claims.
///
/// An intent popped for a path that is already uploading is parked behind
/// the running claim instead of running concurrently; the finishing worker
/// picks it up next. Parking keeps only the latest intent per path.
#[derive(Default)]
pub struct InflightTable {
    claims: DashMap<PathBuf, Claim>,
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `path` for an upload. Returns the intent to run now, or `None`
    /// if another worker holds the path and the intent was parked.
    fn claim(&self, intent: UploadIntent) -> Option<UploadIntent> {
        match self.claims.entry(intent.path.clone()) {
            Entry::Occupied(mut held) => {
                held.get_mut().deferred = Some(intent);
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(Claim {
                    intent: intent.clone(),
                    deferred: None,
                });
                Some(intent)
            }
        }
    }

    /// Release a finished upload's claim. If an intent was parked behind
    /// it, the claim is handed over atomically and the parked intent
    /// returned; the caller runs it next.
    fn release(&self, path: &Path) -> Option<UploadIntent> {
        match self.claims.entry(path.to_path_buf()) {
            Entry::Occupied(mut held) => {
                if let Some(next) = held.get_mut().deferred.take() {
                    held.get_mut().intent = next.clone();
                    Some(next)
                } else {
                    held.remove();
                    None
                }
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Cancel the in-flight upload for `path` and drop anything parked
    /// behind it. The running attempt is not interrupted; its result is
    /// discarded on completion.
    pub fn cancel(&self, path: &Path) {
        if let Some(mut held) = self.claims.get_mut(path) {
            held.intent.cancel();
            held.deferred = None;
        }
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Cumulative pipeline counters, shared with the health snapshot
#[derive(Default)]
pub struct SyncStats {
    uploaded: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

enum Outcome {
    Uploaded(usize),
    Cancelled,
    Failed(SyncError),
}

/// Fixed-size pool of upload workers
pub struct UploadWorkerPool {
    queue: Arc<UploadQueue>,
    store: Arc<dyn ObjectStore>,
    inflight: Arc<InflightTable>,
    stats: Arc<SyncStats>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl UploadWorkerPool {
    pub fn new(
        queue: Arc<UploadQueue>,
        store: Arc<dyn ObjectStore>,
        inflight: Arc<InflightTable>,
        stats: Arc<SyncStats>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            inflight,
            stats,
            retry,
            attempt_timeout,
        }
    }

    /// Spawn `workers` tasks draining the queue. Each task exits once the
    /// queue is closed and drained.
    pub fn spawn(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|id| {
                let pool = Arc::clone(self);
                tokio::spawn(async move { pool.worker_loop(id).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker: usize) {
        tracing::debug!(worker, "upload worker started");
        while let Some(intent) = self.queue.pop().await {
            if intent.is_cancelled() {
                tracing::debug!(path = %intent.path.display(), "discarding cancelled intent");
                continue;
            }

            let Some(mut current) = self.inflight.claim(intent) else {
                // Another worker holds this path; intent parked behind it
                continue;
            };

            loop {
                self.process(worker, &current).await;
                match self.inflight.release(&current.path) {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }
        tracing::debug!(worker, "upload worker stopped");
    }

    /// Run one intent to a terminal state: uploaded, cancelled, or failed.
    async fn process(&self, worker: usize, intent: &UploadIntent) {
        if intent.is_cancelled() {
            tracing::debug!(path = %intent.path.display(), "discarding cancelled intent");
            return;
        }

        self.stats.active.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        tracing::info!(worker, key = %intent.key, path = %intent.path.display(), "upload started");

        let mut attempt = 1u32;
        let outcome = loop {
            if intent.is_cancelled() {
                break Outcome::Cancelled;
            }
            match self.attempt(intent).await {
                Ok(bytes) => break Outcome::Uploaded(bytes),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        key = %intent.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient upload failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Outcome::Failed(e),
            }
        };

        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Uploaded(bytes) => {
                if intent.is_cancelled() {
                    // Path was deleted while the attempt ran; the object made
                    // it to storage but nothing further is done with it
                    tracing::info!(
                        key = %intent.key,
                        "upload completed after cancellation; result ignored"
                    );
                } else {
                    self.stats.uploaded.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(
                        key = %intent.key,
                        bytes,
                        attempts = attempt,
                        elapsed_ms,
                        "upload succeeded"
                    );
                }
            }
            Outcome::Cancelled => {
                tracing::debug!(key = %intent.key, "upload cancelled before completion");
            }
            Outcome::Failed(e) => {
                self.stats.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    key = %intent.key,
                    path = %intent.path.display(),
                    attempts = attempt,
                    elapsed_ms,
                    "upload failed terminally: {e}"
                );
            }
        }
    }

    /// One upload attempt. Content is read fresh per attempt so the newest
    /// bytes are shipped, and each attempt runs under its own timeout.
    async fn attempt(&self, intent: &UploadIntent) -> Result<usize> {
        let body = tokio::fs::read(&intent.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SyncError::PermanentUpload(format!("file vanished: {}", intent.path.display()))
            } else {
                SyncError::Io(e)
            }
        })?;
        let bytes = body.len();

        match tokio::time::timeout(self.attempt_timeout, self.store.put(&intent.key, body)).await {
            Ok(result) => result.map(|_| bytes),
            Err(_) => Err(SyncError::TransientUpload(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            ))),
        }
    }
}
