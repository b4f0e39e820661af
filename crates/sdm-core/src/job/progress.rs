//! Aggregate progress snapshot for a job (bytes done, ETA, rate).
//!
//! Consumers compute rate = current_bytes / elapsed_secs and
//! ETA = (total_bytes - current_bytes) / rate.

/// Point-in-time view of a job's aggregate progress.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    /// Bytes of successfully finished tasks plus live bytes of in-flight tasks.
    pub current_bytes: u64,
    /// Caller-supplied total (0 = unknown).
    pub total_bytes: u64,
    /// Seconds since the first `start()` (0 if never started).
    pub elapsed_secs: f64,
    pub tasks_finished: usize,
    pub tasks_enqueued: usize,
    pub task_count: usize,
}

impl JobProgress {
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.current_bytes as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if total is unknown or nothing has moved yet).
    pub fn eta_secs(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.current_bytes);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0]; None when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some((self.current_bytes as f64 / self.total_bytes as f64).min(1.0))
    }
}
