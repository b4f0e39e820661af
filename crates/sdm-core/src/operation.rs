//! Fetch operation: one concrete network fetch attempt.
//!
//! The whole body is accumulated in memory and written to the interim path as
//! a unit once the transport reports success. A failed fetch is still a
//! `Finished` operation; callers must check [`FetchOperation::error`].

use crate::error::DownloadError;
use crate::storage::InterimFile;
use crate::transport::Transport;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lifecycle of a fetch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Ready,
    Executing,
    /// Execution completed; may carry an error.
    Finished,
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }

    fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Ready, Executing) | (Ready, Cancelled) | (Executing, Finished) | (Executing, Cancelled)
        )
    }
}

struct Status {
    state: OperationState,
    error: Option<DownloadError>,
}

pub struct FetchOperation {
    url: String,
    interim_path: PathBuf,
    transport: Arc<dyn Transport>,
    received: AtomicU64,
    cancel: AtomicBool,
    status: Mutex<Status>,
}

impl FetchOperation {
    pub fn new(url: &str, interim_path: &Path, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: url.to_string(),
            interim_path: interim_path.to_path_buf(),
            transport,
            received: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
            status: Mutex::new(Status {
                state: OperationState::Ready,
                error: None,
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a validated transition; returns false (and changes nothing) if
    /// `next` is not reachable from the current state.
    fn transition(&self, next: OperationState, error: Option<DownloadError>) -> bool {
        let mut status = self.status();
        if !status.state.can_transition_to(next) {
            tracing::trace!(url = %self.url, from = ?status.state, to = ?next, "transition refused");
            return false;
        }
        status.state = next;
        status.error = error;
        true
    }

    /// Fetch the URL into the interim path, blocking the calling thread.
    /// Returns immediately if the operation was cancelled before it started.
    pub fn execute(&self) {
        if !self.transition(OperationState::Executing, None) {
            tracing::debug!(url = %self.url, "fetch skipped, operation no longer ready");
            return;
        }
        tracing::debug!(url = %self.url, interim = %self.interim_path.display(), "fetch started");

        let mut buffer = Vec::new();
        let fetched = self.transport.fetch(&self.url, &self.cancel, &mut |chunk| {
            buffer.extend_from_slice(chunk);
            self.received.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        if self.cancel.load(Ordering::Relaxed) {
            // cancel() already moved us to Cancelled.
            tracing::debug!(url = %self.url, received = self.progress(), "fetch cancelled");
            return;
        }

        let error = match fetched {
            Ok(()) => self.write_interim(&buffer).err(),
            Err(failure) => Some(DownloadError::Network {
                url: self.url.clone(),
                failure,
            }),
        };
        match error {
            None => tracing::debug!(url = %self.url, bytes = buffer.len(), "fetch finished"),
            Some(ref e) => tracing::warn!(url = %self.url, error = %e, "fetch failed"),
        }
        self.transition(OperationState::Finished, error);
    }

    fn write_interim(&self, body: &[u8]) -> Result<(), DownloadError> {
        let fs_err = |e| DownloadError::filesystem(&self.interim_path, e);
        let mut file = InterimFile::create(&self.interim_path).map_err(fs_err)?;
        file.preallocate(body.len() as u64).map_err(fs_err)?;
        file.write_all(body).map_err(fs_err)?;
        file.sync().map_err(fs_err)?;
        Ok(())
    }

    /// Request cancellation. Non-blocking: an executing fetch notices the flag
    /// at its next chunk or progress tick. No effect once `Finished`.
    pub fn cancel(&self) {
        if self.transition(OperationState::Cancelled, Some(DownloadError::Cancelled)) {
            self.cancel.store(true, Ordering::Relaxed);
            tracing::debug!(url = %self.url, "cancel requested");
        }
    }

    /// Bytes received so far; valid during and after execution.
    pub fn progress(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> OperationState {
        self.status().state
    }

    /// Terminal error, if any. `Cancelled` operations report [`DownloadError::Cancelled`].
    pub fn error(&self) -> Option<DownloadError> {
        self.status().error.clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interim_path(&self) -> &Path {
        &self.interim_path
    }
}

impl std::fmt::Debug for FetchOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOperation")
            .field("url", &self.url)
            .field("interim_path", &self.interim_path)
            .field("state", &self.state())
            .field("received", &self.progress())
            .finish()
    }
}
