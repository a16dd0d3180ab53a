//! Event coalescing
//!
//! Absorbs bursts of raw filesystem events into one settled upload intent
//! per path. Every event for a path (re)starts its debounce window; the
//! intent is emitted only once the path has been quiet for the full window.
//! Directory creations skip debouncing entirely: the directory contents are
//! enumerated and enqueued as-is.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use walkdir::WalkDir;

use crate::error::Result;
use crate::mapper::PathMapper;
use crate::pool::InflightTable;
use crate::queue::UploadQueue;
use crate::types::{EngineState, EventKind, RawEvent, UploadIntent};

struct Pending {
    deadline: Instant,
    kind: EventKind,
}

/// Converts the raw event stream into debounced upload intents.
///
/// Runs as the single dispatch task: the pending map is owned here and
/// never shared, so no locking is needed on the hot path.
pub struct EventCoalescer {
    queue: Arc<UploadQueue>,
    inflight: Arc<InflightTable>,
    mapper: PathMapper,
    debounce: Duration,
    scan_limit: usize,
    state: Arc<Mutex<EngineState>>,
    pending: HashMap<PathBuf, Pending>,
}

impl EventCoalescer {
    pub fn new(
        queue: Arc<UploadQueue>,
        inflight: Arc<InflightTable>,
        mapper: PathMapper,
        debounce: Duration,
        scan_limit: usize,
        state: Arc<Mutex<EngineState>>,
    ) -> Self {
        Self {
            queue,
            inflight,
            mapper,
            debounce,
            scan_limit,
            state,
            pending: HashMap::new(),
        }
    }

    /// Consume raw events until the source channel closes, then flush any
    /// still-pending paths and close the queue so workers can drain.
    pub async fn run(mut self, mut events: mpsc::Receiver<RawEvent>) {
        loop {
            let next_deadline = self.pending.values().map(|p| p.deadline).min();
            tokio::select! {
                maybe = events.recv() => match maybe {
                    Some(event) => {
                        if self.handle_event(event).await.is_err() {
                            tracing::debug!("queue closed; coalescer exiting");
                            return;
                        }
                    }
                    None => break,
                },
                _ = sleep_until(next_deadline), if next_deadline.is_some() => {
                    if self.flush_due().await.is_err() {
                        tracing::debug!("queue closed; coalescer exiting");
                        return;
                    }
                }
            }
        }

        // Intake ended. If nobody asked us to drain, the event source died.
        {
            let mut state = self.state.lock();
            if *state == EngineState::Running {
                tracing::error!("event source disconnected unexpectedly; draining");
                *state = EngineState::Draining;
            }
        }

        let _ = self.flush_all().await;
        self.queue.close();
    }

    async fn handle_event(&mut self, event: RawEvent) -> Result<()> {
        if event.kind.is_directory() {
            return self.scan_directory(&event.path).await;
        }
        match event.kind {
            EventKind::Removed => {
                self.cancel_path(&event.path);
            }
            _ => {
                // Any event for the path restarts its quiet window
                self.pending.insert(
                    event.path,
                    Pending {
                        deadline: Instant::now() + self.debounce,
                        kind: event.kind,
                    },
                );
            }
        }
        Ok(())
    }

    /// Emit intents for every path whose quiet window has elapsed.
    async fn flush_due(&mut self) -> Result<()> {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        for path in due {
            if let Some(pending) = self.pending.remove(&path) {
                tracing::debug!(path = %path.display(), kind = ?pending.kind, "path settled");
                self.emit(&path).await?;
            }
        }
        Ok(())
    }

    /// Emit intents for everything still pending, regardless of deadlines.
    /// Used on shutdown so settled-enough work is not lost.
    async fn flush_all(&mut self) -> Result<()> {
        let paths: Vec<PathBuf> = self.pending.keys().cloned().collect();
        for path in paths {
            self.pending.remove(&path);
            self.emit(&path).await?;
        }
        Ok(())
    }

    /// Map and enqueue one path. Unmappable paths are dropped with a
    /// warning; they never halt the pipeline.
    async fn emit(&self, path: &Path) -> Result<()> {
        let key = match self.mapper.map(path) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(path = %path.display(), "dropping event: {e}");
                return Ok(());
            }
        };
        self.queue.push(UploadIntent::new(path, key)).await
    }

    /// A deleted path must not be uploaded: clear its quiet window and
    /// cancel any queued or in-flight intent.
    fn cancel_path(&mut self, path: &Path) {
        self.pending.remove(path);
        if self.queue.cancel(path) {
            tracing::debug!(path = %path.display(), "cancelled queued upload");
        }
        self.inflight.cancel(path);
    }

    /// Enumerate a freshly created directory and enqueue its current files,
    /// bypassing debounce. Best-effort snapshot, bounded by `scan_limit`.
    async fn scan_directory(&self, dir: &Path) -> Result<()> {
        let mut emitted = 0usize;
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "directory scan entry error: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if emitted >= self.scan_limit {
                tracing::warn!(
                    dir = %dir.display(),
                    limit = self.scan_limit,
                    "directory scan hit ceiling; remaining files not enqueued"
                );
                break;
            }
            self.emit(entry.path()).await?;
            emitted += 1;
        }
        tracing::info!(dir = %dir.display(), files = emitted, "scanned new directory");
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
