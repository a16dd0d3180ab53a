//! Error types for objsync

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for objsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for objsync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("path {} is not under the watched root", .path.display())]
    InvalidPath { path: PathBuf },

    #[error("transient upload failure: {0}")]
    TransientUpload(String),

    #[error("permanent upload failure: {0}")]
    PermanentUpload(String),

    #[error("upload queue is closed")]
    QueueClosed,

    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Check if the failure is expected to clear on its own and is worth
    /// retrying. Local IO errors are retryable unless the file is gone or
    /// unreadable for good.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::TransientUpload(_) => true,
            SyncError::Io(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::TransientUpload("503".into()).is_transient());
        assert!(!SyncError::PermanentUpload("403".into()).is_transient());
        assert!(!SyncError::QueueClosed.is_transient());

        let gone = SyncError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!gone.is_transient());

        let flaky = SyncError::Io(std::io::Error::new(
            std::io::ErrorKind::Interrupted,
            "interrupted",
        ));
        assert!(flaky.is_transient());
    }
}
