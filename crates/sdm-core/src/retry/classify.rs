//! Classify download errors into retry policy error kinds.

use crate::error::{DownloadError, NetworkFailure};
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

pub fn classify_network_failure(failure: &NetworkFailure) -> ErrorKind {
    match failure {
        NetworkFailure::Timeout(_) => ErrorKind::Timeout,
        NetworkFailure::Connection(_) => ErrorKind::Connection,
        NetworkFailure::Http(code) => classify_http_status(*code),
        NetworkFailure::Aborted | NetworkFailure::Transfer(_) => ErrorKind::Other,
    }
}

/// Classify a task error. Filesystem failures and cancellation are never retried.
pub fn classify(e: &DownloadError) -> ErrorKind {
    match e {
        DownloadError::Network { failure, .. } => classify_network_failure(failure),
        DownloadError::Filesystem { .. } | DownloadError::Cancelled => ErrorKind::Other,
    }
}
