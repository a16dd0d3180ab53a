//! Object storage backends
//!
//! Workers talk to storage through the [`ObjectStore`] trait so tests can
//! substitute the in-memory backend for the S3 client.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use parking_lot::Mutex;

use crate::error::{Result, SyncError};

/// Whole-object storage surface the upload workers need.
///
/// `put` atomically replaces the object at `key`; there are no partial or
/// multipart semantics at this layer.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;
}

/// S3-compatible storage backend
pub struct S3Store {
    client: S3Client,
    bucket: String,
}

impl S3Store {
    /// Build a client for `bucket` from the standard AWS environment
    /// (credentials, region).
    pub async fn connect(bucket: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() {
            return Err(SyncError::Config("bucket name is empty".to_string()));
        }

        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(Self {
            client: S3Client::new(&config),
            bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify_put_error)?;

        tracing::debug!(key, bytes = size, "put object to s3://{}", self.bucket);
        Ok(())
    }
}

/// Split SDK failures into retryable and terminal.
///
/// Connection-level failures (dispatch, timeout, malformed response) and
/// 5xx/throttling service responses are expected to clear; everything else
/// (no such bucket, access denied, invalid key) will not.
fn classify_put_error(err: SdkError<PutObjectError>) -> SyncError {
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            SyncError::TransientUpload(err.to_string())
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            if status >= 500 || status == 429 {
                SyncError::TransientUpload(err.to_string())
            } else {
                SyncError::PermanentUpload(err.to_string())
            }
        }
        _ => SyncError::PermanentUpload(err.to_string()),
    }
}

/// Failure kind an in-memory store can be scripted to return
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Transient,
    Permanent,
}

/// In-memory backend for tests: records every put, can be scripted to fail
/// the next N attempts for a key, and tracks per-key overlap so tests can
/// prove no two uploads for a path ran concurrently.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<ScriptedFailure>>>,
    latency: Mutex<Option<std::time::Duration>>,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` puts for `key` with the given failure kind.
    pub fn fail_next(&self, key: &str, failure: ScriptedFailure, times: usize) {
        let mut failures = self.failures.lock();
        let scripted = failures.entry(key.to_string()).or_default();
        for _ in 0..times {
            scripted.push_back(failure);
        }
    }

    /// Make every put take at least `delay`, to hold uploads in flight.
    pub fn set_latency(&self, delay: std::time::Duration) {
        *self.latency.lock() = Some(delay);
    }

    /// Current object content, if any
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    /// Keys of every successful put, in completion order
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().clone()
    }

    /// Number of successful puts for `key`
    pub fn put_count(&self, key: &str) -> usize {
        self.puts.lock().iter().filter(|k| k.as_str() == key).count()
    }

    /// Highest number of puts ever in flight at once for `key`
    pub fn max_concurrent(&self, key: &str) -> usize {
        self.max_active.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        {
            let mut active = self.active.lock();
            let count = active.entry(key.to_string()).or_insert(0);
            *count += 1;
            let mut max_active = self.max_active.lock();
            let peak = max_active.entry(key.to_string()).or_insert(0);
            *peak = (*peak).max(*count);
        }

        let delay = *self.latency.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .failures
            .lock()
            .get_mut(key)
            .and_then(|scripted| scripted.pop_front());

        let result = match scripted {
            Some(ScriptedFailure::Transient) => Err(SyncError::TransientUpload(format!(
                "scripted transient failure for {key}"
            ))),
            Some(ScriptedFailure::Permanent) => Err(SyncError::PermanentUpload(format!(
                "scripted permanent failure for {key}"
            ))),
            None => {
                self.objects.lock().insert(key.to_string(), body);
                self.puts.lock().push(key.to_string());
                Ok(())
            }
        };

        {
            let mut active = self.active.lock();
            if let Some(count) = active.get_mut(key) {
                *count -= 1;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_records_puts() {
        let store = MemoryStore::new();
        store.put("a.txt", b"one".to_vec()).await.unwrap();
        store.put("a.txt", b"two".to_vec()).await.unwrap();

        assert_eq!(store.object("a.txt").unwrap(), b"two");
        assert_eq!(store.put_count("a.txt"), 2);
    }

    #[tokio::test]
    async fn memory_store_scripted_failures_drain() {
        let store = MemoryStore::new();
        store.fail_next("a.txt", ScriptedFailure::Transient, 2);

        assert!(store
            .put("a.txt", b"x".to_vec())
            .await
            .is_err_and(|e| e.is_transient()));
        assert!(store.put("a.txt", b"x".to_vec()).await.is_err());
        store.put("a.txt", b"x".to_vec()).await.unwrap();
        assert_eq!(store.put_count("a.txt"), 1);
    }
}
