//! Build, run and report a job for the `get` and `batch` commands.

use anyhow::{bail, Result};
use sdm_core::config::SdmConfig;
use sdm_core::retry::{self, RetryPolicy};
use sdm_core::{
    DownloadJob, DownloadTask, JobEvent, JobProgress, JobState, TaskOutcome, Transport,
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::cli::JobArgs;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
/// Progress lines are padded to this width so a redraw covers the previous one.
const LINE_WIDTH: usize = 78;

/// Retry policy from `--retries`, else the config's `[retry]` section, else none.
pub fn retry_policy(cfg: &SdmConfig, args: &JobArgs) -> RetryPolicy {
    let base = cfg.retry.as_ref().map(RetryPolicy::from);
    match (args.retries, base) {
        (Some(retries), base) => RetryPolicy {
            max_attempts: retries.saturating_add(1),
            ..base.unwrap_or_default()
        },
        (None, Some(policy)) => policy,
        (None, None) => RetryPolicy::none(),
    }
}

pub fn transport(cfg: &SdmConfig) -> Arc<dyn Transport> {
    Arc::new(sdm_core::CurlTransport::new(cfg.curl_options()))
}

/// A job with `tasks` added in order, sized from the arguments and config.
pub fn build_job(
    cfg: &SdmConfig,
    args: &JobArgs,
    tasks: Vec<DownloadTask>,
    total_size: Option<u64>,
) -> Result<DownloadJob> {
    let job = DownloadJob::with_max_concurrent(
        args.concurrency.unwrap_or(cfg.max_concurrent_downloads),
    );
    for task in tasks {
        task.set_verbose(args.verbose);
        job.add_task(task)?;
    }
    if let Some(total) = args.total_size.or(total_size) {
        job.set_total_size(total);
    }
    Ok(job)
}

/// Run `job` to settlement under `policy`, printing progress every 500 ms and
/// one line per finished task. Errors when the job does not finish cleanly.
pub fn run_and_report(job: &DownloadJob, policy: &RetryPolicy) -> Result<()> {
    let events = job.subscribe();
    let done = &AtomicBool::new(false);

    let state = thread::scope(|s| {
        s.spawn(move || {
            let tasks = job.tasks();
            while !done.load(Ordering::Relaxed) {
                match events.recv_timeout(PROGRESS_INTERVAL) {
                    Ok(event) => report_event(&tasks, event),
                    Err(RecvTimeoutError::Timeout) => redraw(&progress_line(&job.progress())),
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            for event in events.try_iter() {
                report_event(&tasks, event);
            }
        });
        let state = retry::run_job(job, policy);
        done.store(true, Ordering::Relaxed);
        state
    });

    let progress = job.progress();
    redraw(&progress_line(&progress));
    println!();
    println!(
        "{} of {} file(s) finished, job {}",
        job.tasks().iter().filter(|t| t.succeeded()).count(),
        progress.task_count,
        state
    );

    match state {
        JobState::Finished => Ok(()),
        JobState::Failed => match job.last_error() {
            Some(e) => bail!("job failed: {e}"),
            None => bail!("job failed"),
        },
        other => bail!("job ended {other}"),
    }
}

fn report_event(tasks: &[Arc<DownloadTask>], event: JobEvent) {
    match event {
        JobEvent::TaskFinished { index, outcome } => {
            if let Some(task) = tasks.get(index) {
                // Overwrite the progress line, then leave the event on its own line.
                println!("\r{:<width$}", task_line(task, &outcome), width = LINE_WIDTH);
            }
        }
        JobEvent::StateChanged(state) => tracing::debug!(%state, "job state"),
    }
}

fn task_line(task: &DownloadTask, outcome: &TaskOutcome) -> String {
    match outcome {
        Ok(bytes) => format!(
            "  done    {} ({bytes} bytes)",
            task.destination_path().display()
        ),
        Err(e) if e.is_cancelled() => format!("  stopped {}", task.url()),
        Err(e) => format!("  failed  {}: {e}", task.url()),
    }
}

/// Redraw the current terminal line in place.
fn redraw(line: &str) {
    let mut out = io::stdout().lock();
    let _ = write!(out, "\r{:<width$}", line, width = LINE_WIDTH);
    let _ = out.flush();
}

fn progress_line(stats: &JobProgress) -> String {
    let done_mib = stats.current_bytes as f64 / 1_048_576.0;
    let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
    match stats.fraction() {
        Some(fraction) => {
            let total_mib = stats.total_bytes as f64 / 1_048_576.0;
            let eta = stats
                .eta_secs()
                .map(|s| format!("{:.0}s", s))
                .unwrap_or_else(|| "?".to_string());
            format!(
                "  {:.1} / {:.1} MiB ({:.1}%)  {:.2} MiB/s  ETA {}  [{}/{} files]",
                done_mib,
                total_mib,
                fraction * 100.0,
                rate_mib,
                eta,
                stats.tasks_finished,
                stats.task_count
            )
        }
        None => format!(
            "  {:.1} MiB  {:.2} MiB/s  [{}/{} files]",
            done_mib, rate_mib, stats.tasks_finished, stats.task_count
        ),
    }
}
