//! Retry loop: restart a failed job until it settles cleanly or policy says stop.

use super::classify::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::job::{DownloadJob, JobState};
use std::time::Duration;

/// Start `job`, wait for it to settle, and restart it while every failed task
/// failed for a retryable reason. Returns the state the job ended in.
///
/// A job that ends `Paused` (stopped from another thread) is returned as is.
pub fn run_job(job: &DownloadJob, policy: &RetryPolicy) -> JobState {
    let mut attempt = 1u32;
    loop {
        job.start();
        let state = job.wait();
        if state != JobState::Failed {
            return state;
        }
        let Some(delay) = backoff_for(job, policy, attempt) else {
            return state;
        };
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "job failed with retryable errors, restarting"
        );
        std::thread::sleep(delay);
        attempt += 1;
    }
}

/// Longest backoff among the failed tasks, or None if any of them should not be retried.
fn backoff_for(job: &DownloadJob, policy: &RetryPolicy, attempt: u32) -> Option<Duration> {
    let mut longest = None;
    for task in job.tasks() {
        let Some(err) = task.last_error() else {
            continue;
        };
        match policy.decide(attempt, classify(&err)) {
            RetryDecision::NoRetry => {
                tracing::debug!(url = task.url(), error = %err, "not retrying");
                return None;
            }
            RetryDecision::RetryAfter(d) => longest = longest.max(Some(d)),
        }
    }
    longest
}
