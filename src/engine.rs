//! Sync engine
//!
//! Owns the whole pipeline: watcher -> coalescer -> queue -> worker pool.
//! Handles lifecycle (Stopped -> Running -> Draining -> Stopped) and exposes
//! a pollable health snapshot.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coalesce::EventCoalescer;
use crate::error::Result;
use crate::mapper::PathMapper;
use crate::pool::{InflightTable, SyncStats, UploadWorkerPool};
use crate::queue::UploadQueue;
use crate::store::ObjectStore;
use crate::types::{EngineState, HealthSnapshot, SyncConfig};
use crate::watch::{self, WatchHandle};

/// Capacity of the raw-event channel between the watcher thread and the
/// coalescer. Full means the watcher thread blocks, which is acceptable
/// backpressure for burst floods.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct SyncEngine {
    state: Arc<Mutex<EngineState>>,
    queue: Arc<UploadQueue>,
    stats: Arc<SyncStats>,
    watch: Option<WatchHandle>,
    coalescer: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Start watching `config.root` and uploading into `store`.
    ///
    /// Must be called from within a tokio runtime; the coalescer and worker
    /// tasks are spawned onto it.
    pub fn start(config: SyncConfig, store: Arc<dyn ObjectStore>) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(Mutex::new(EngineState::Running));
        let queue = Arc::new(UploadQueue::new(config.queue_capacity));
        let inflight = Arc::new(InflightTable::new());
        let stats = Arc::new(SyncStats::new());

        // The watcher reports canonical paths on some platforms; the mapper
        // root must match or every event would be rejected
        let root = config.root.canonicalize()?;
        let mapper = PathMapper::new(&root, &config.key_prefix);

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let watch = watch::spawn(&root, tx)?;

        let coalescer = EventCoalescer::new(
            queue.clone(),
            inflight.clone(),
            mapper,
            config.debounce(),
            config.scan_limit,
            state.clone(),
        );
        let coalescer = tokio::spawn(coalescer.run(rx));

        let pool = Arc::new(UploadWorkerPool::new(
            queue.clone(),
            store,
            inflight,
            stats.clone(),
            config.retry.clone(),
            config.attempt_timeout(),
        ));
        let workers = pool.spawn(config.effective_workers());

        tracing::info!(
            root = %config.root.display(),
            bucket = %config.bucket,
            workers = workers.len(),
            "sync engine running"
        );

        Ok(Self {
            state,
            queue,
            stats,
            watch: Some(watch),
            coalescer,
            workers,
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Current health, pollable at any time.
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: *self.state.lock(),
            queue_depth: self.queue.len(),
            active_workers: self.stats.active(),
            uploaded: self.stats.uploaded(),
            failed: self.stats.failed(),
        }
    }

    /// Stop intake and drain: pending paths are flushed, queued and
    /// in-flight uploads get until `grace` to complete, stragglers are
    /// aborted.
    pub async fn stop(mut self, grace: Duration) {
        {
            let mut state = self.state.lock();
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Draining;
        }
        tracing::info!("sync engine draining");

        // Dropping the watcher closes the event channel; the coalescer
        // flushes its pending paths and closes the queue behind itself.
        self.watch.take();

        let deadline = tokio::time::Instant::now() + grace;
        if tokio::time::timeout_at(deadline, &mut self.coalescer)
            .await
            .is_err()
        {
            self.coalescer.abort();
            // The coalescer never closed the queue; do it so workers exit
            self.queue.close();
        }

        for mut worker in self.workers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut worker).await.is_err() {
                tracing::warn!("upload worker missed the grace deadline; aborting");
                worker.abort();
            }
        }

        *self.state.lock() = EngineState::Stopped;
        tracing::info!(
            uploaded = self.stats.uploaded(),
            failed = self.stats.failed(),
            "sync engine stopped"
        );
    }
}
