//! Error taxonomy shared by operations, tasks and jobs.
//!
//! Errors are captured at the operation and handed up through completion
//! callbacks, so they are `Clone`: a task and its job may both hold the same
//! failure.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Network-level failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkFailure {
    /// Connect or transfer timed out (including the low-speed abort).
    #[error("timed out: {0}")]
    Timeout(String),
    /// DNS failure, refused or reset connection, empty reply.
    #[error("connection failed: {0}")]
    Connection(String),
    /// Server answered with a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// Transfer aborted from our side.
    #[error("transfer aborted")]
    Aborted,
    /// Anything else the transport could not complete.
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Terminal error of a fetch operation, as surfaced by tasks and jobs.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    /// Transport, connection or status failure while fetching.
    #[error("fetching {url}: {failure}")]
    Network { url: String, failure: NetworkFailure },
    /// Writing the interim file or publishing it to the destination failed.
    #[error("{}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    /// The operation was cancelled before it finished.
    #[error("download cancelled")]
    Cancelled,
}

/// Coarse classification of a [`DownloadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Filesystem,
    Cancelled,
}

impl DownloadError {
    pub fn filesystem(path: &Path, source: io::Error) -> Self {
        DownloadError::Filesystem {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Network { .. } => FailureKind::Network,
            DownloadError::Filesystem { .. } => FailureKind::Filesystem,
            DownloadError::Cancelled => FailureKind::Cancelled,
        }
    }

    /// User-initiated stops are not failures.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }
}

/// Misuse of the job control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The task set is fixed once the job has been started.
    #[error("tasks cannot be added after the job has been started")]
    AlreadyStarted,
}
