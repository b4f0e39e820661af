//! Network contract consumed by fetch operations.
//!
//! An operation only needs "fetch the bytes at this locator, hand me chunks as
//! they arrive, and tell me how it ended". [`CurlTransport`] provides that over
//! libcurl; tests substitute a scripted transport.

mod easy;
#[cfg(test)]
pub(crate) mod testing;

pub use easy::{classify_curl_error, CurlTransport};

use crate::error::NetworkFailure;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Blocking byte fetcher. Implementations are shared across worker threads.
pub trait Transport: Send + Sync {
    /// Fetch `url`, passing each received chunk to `on_chunk` in order.
    ///
    /// Must return promptly with [`NetworkFailure::Aborted`] once `cancel` is
    /// set, including while the connection is idle.
    fn fetch(
        &self,
        url: &str,
        cancel: &AtomicBool,
        on_chunk: &mut dyn FnMut(&[u8]),
    ) -> Result<(), NetworkFailure>;
}

/// Options applied to every curl easy handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Hard wall-clock limit for a whole transfer (None = unlimited).
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: None,
            user_agent: None,
        }
    }
}
