//! Download job: an ordered batch of tasks sharing one work queue.
//!
//! Task completions arrive on worker threads and are folded into the job's
//! aggregates under a single mutex. Observers get the same information through
//! [`DownloadJob::subscribe`] (a channel, never a callback on a worker) or by
//! blocking in [`DownloadJob::wait`].

mod progress;
mod state;

pub use progress::JobProgress;
pub use state::JobState;

use crate::error::{DownloadError, JobError};
use crate::operation::OperationState;
use crate::queue::WorkQueue;
use crate::task::{CompletionCallback, DownloadTask, Submission, TaskOutcome};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Worker count used when no queue or limit is supplied.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Notification delivered to [`DownloadJob::subscribe`] receivers.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Task `index` (insertion order) reached a terminal outcome.
    TaskFinished { index: usize, outcome: TaskOutcome },
    StateChanged(JobState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Succeeded,
    Cancelled,
    Failed,
}

struct Aggregate {
    state: JobState,
    tasks: Vec<Arc<DownloadTask>>,
    /// Latest terminal outcome per task, by index.
    settlements: Vec<Option<Settlement>>,
    completed_bytes: u64,
    total_size: u64,
    last_error: Option<DownloadError>,
    tasks_enqueued: usize,
    tasks_finished: usize,
    /// Submission passes in progress; settlement waits until none remain.
    dispatching: usize,
    /// Tasks found mid-cancellation by `start()`, resubmitted once they report back.
    resume: Vec<bool>,
    started_at: Option<Instant>,
    subscribers: Vec<mpsc::Sender<JobEvent>>,
}

impl Aggregate {
    fn emit(&mut self, event: JobEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "job state");
        self.state = next;
        self.emit(JobEvent::StateChanged(next));
        true
    }

    fn idle(&self) -> bool {
        self.dispatching == 0 && self.tasks_finished >= self.tasks_enqueued
    }

    /// Decide the running job's terminal state once every submission has settled.
    fn settle(&mut self) {
        if self.state != JobState::Running || !self.idle() {
            return;
        }
        let failed = self
            .settlements
            .iter()
            .any(|s| *s == Some(Settlement::Failed));
        let all_succeeded = self
            .settlements
            .iter()
            .all(|s| *s == Some(Settlement::Succeeded));
        let next = if failed {
            JobState::Failed
        } else if all_succeeded {
            JobState::Finished
        } else {
            // Something was cancelled individually; work remains.
            JobState::Paused
        };
        self.transition(next);
        match next {
            JobState::Failed => tracing::warn!(
                tasks = self.tasks.len(),
                error = ?self.last_error.as_ref().map(|e| e.to_string()),
                "job failed"
            ),
            _ => tracing::info!(
                tasks = self.tasks.len(),
                bytes = self.completed_bytes,
                state = %next,
                "job settled"
            ),
        }
    }

    fn current_size(&self) -> u64 {
        let in_flight: u64 = self
            .tasks
            .iter()
            .filter_map(|t| t.in_flight_progress())
            .sum();
        self.completed_bytes + in_flight
    }
}

struct JobShared {
    aggregate: Mutex<Aggregate>,
    changed: Condvar,
    queue: OnceLock<WorkQueue>,
}

impl JobShared {
    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.aggregate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Completion hook for task `index`. Runs on whichever thread finished the task.
    fn task_finished(&self, index: usize, outcome: &TaskOutcome) {
        let mut agg = self.lock();
        agg.tasks_finished += 1;
        if let Some(task) = agg.tasks.get(index) {
            // Bytes move from in-flight to completed under this lock.
            task.take_unreported();
        }
        let settlement = match outcome {
            Ok(bytes) => {
                agg.completed_bytes += bytes;
                Settlement::Succeeded
            }
            Err(e) if e.is_cancelled() => Settlement::Cancelled,
            Err(e) => {
                agg.last_error = Some(e.clone());
                Settlement::Failed
            }
        };
        if let Some(slot) = agg.settlements.get_mut(index) {
            *slot = Some(settlement);
        }
        agg.emit(JobEvent::TaskFinished {
            index,
            outcome: outcome.clone(),
        });

        let wants_resume = agg.resume.get_mut(index).map_or(false, std::mem::take);
        let resubmit = if wants_resume
            && settlement == Settlement::Cancelled
            && agg.state == JobState::Running
        {
            agg.tasks.get(index).cloned().zip(self.queue.get().cloned())
        } else {
            None
        };

        if let Some((task, queue)) = resubmit {
            agg.dispatching += 1;
            drop(agg);
            tracing::debug!(index, url = task.url(), "resuming task cancelled before restart");
            let submission = task.submit(&queue);
            agg = self.lock();
            agg.dispatching -= 1;
            if submission.is_new() {
                agg.tasks_enqueued += 1;
            }
            if agg.state != JobState::Running {
                // stop() ran while we were resubmitting.
                drop(agg);
                task.cancel();
                agg = self.lock();
            }
        }

        agg.settle();
        drop(agg);
        self.changed.notify_all();
    }
}

fn completion_hook(shared: Weak<JobShared>, index: usize) -> CompletionCallback {
    Arc::new(move |outcome: &TaskOutcome| {
        if let Some(shared) = shared.upgrade() {
            shared.task_finished(index, outcome);
        }
    })
}

/// A batch of downloads controlled and observed as one unit.
///
/// Tasks belonging to a job should only be submitted through the job, or the
/// enqueue/finish accounting will not line up.
pub struct DownloadJob {
    shared: Arc<JobShared>,
    max_concurrent: usize,
}

impl Default for DownloadJob {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadJob {
    pub fn new() -> Self {
        Self::with_max_concurrent(DEFAULT_MAX_CONCURRENT)
    }

    /// Job whose queue (created on first start) runs at most `max_concurrent` fetches.
    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(JobShared {
                aggregate: Mutex::new(Aggregate {
                    state: JobState::NeverStarted,
                    tasks: Vec::new(),
                    settlements: Vec::new(),
                    completed_bytes: 0,
                    total_size: 0,
                    last_error: None,
                    tasks_enqueued: 0,
                    tasks_finished: 0,
                    dispatching: 0,
                    resume: Vec::new(),
                    started_at: None,
                    subscribers: Vec::new(),
                }),
                changed: Condvar::new(),
                queue: OnceLock::new(),
            }),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Job running on an existing queue, possibly shared with other jobs.
    pub fn with_queue(queue: WorkQueue) -> Self {
        let job = Self::with_max_concurrent(queue.max_concurrent());
        // Freshly created, so the cell is empty.
        let _ = job.shared.queue.set(queue);
        job
    }

    fn lock(&self) -> MutexGuard<'_, Aggregate> {
        self.shared.lock()
    }

    /// The job's work queue, created on first use.
    pub fn queue(&self) -> &WorkQueue {
        self.shared
            .queue
            .get_or_init(|| WorkQueue::new(self.max_concurrent))
    }

    /// Append a task. Insertion order is enqueue order.
    pub fn add_task(
        &self,
        task: impl Into<Arc<DownloadTask>>,
    ) -> Result<Arc<DownloadTask>, JobError> {
        let task = task.into();
        let mut agg = self.lock();
        if agg.state != JobState::NeverStarted {
            return Err(JobError::AlreadyStarted);
        }
        agg.tasks.push(Arc::clone(&task));
        agg.settlements.push(None);
        agg.resume.push(false);
        Ok(task)
    }

    /// Submit every task that is not already queued or finished, in order.
    ///
    /// Safe to call repeatedly: a paused job resumes, a failed job retries
    /// its failed tasks, completed work is never fetched again.
    pub fn start(&self) {
        let queue = self.queue().clone();
        let tasks = {
            let mut agg = self.lock();
            agg.dispatching += 1;
            agg.started_at.get_or_insert_with(Instant::now);
            agg.transition(JobState::Running);
            agg.tasks.clone()
        };

        let mut newly_queued = 0usize;
        for (index, task) in tasks.iter().enumerate() {
            task.set_job_hook(completion_hook(Arc::downgrade(&self.shared), index));
            loop {
                let submission = task.submit(&queue);
                let mut agg = self.lock();
                match submission {
                    s if s.is_new() => {
                        agg.tasks_enqueued += 1;
                        newly_queued += 1;
                    }
                    Submission::AlreadyFinished => {
                        agg.settlements[index] = Some(Settlement::Succeeded);
                    }
                    _ => match task.operation_state() {
                        // Still winding down from stop(); its hook resubmits it.
                        Some(OperationState::Cancelled) => agg.resume[index] = true,
                        // Reported back between submit and here: submit again.
                        None if task.finished() => continue,
                        _ => {}
                    },
                }
                break;
            }
        }

        let mut agg = self.lock();
        agg.dispatching -= 1;
        tracing::info!(
            tasks = tasks.len(),
            newly_queued,
            max_concurrent = queue.max_concurrent(),
            "job started"
        );
        agg.settle();
        drop(agg);
        self.shared.changed.notify_all();
    }

    /// Cancel every queued task and pause the job. Returns without waiting;
    /// cancelled tasks settle later and can be resumed by `start()`.
    pub fn stop(&self) {
        let tasks = {
            let mut agg = self.lock();
            if agg.state == JobState::Running {
                agg.transition(JobState::Paused);
            }
            agg.tasks.clone()
        };
        let mut cancelled = 0usize;
        for task in tasks.iter().filter(|t| t.queued()) {
            task.cancel();
            cancelled += 1;
        }
        tracing::info!(cancelled, "job stopped");
        self.shared.changed.notify_all();
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    /// Finished bytes plus live in-flight bytes, computed now.
    pub fn current_size(&self) -> u64 {
        self.lock().current_size()
    }

    pub fn total_size(&self) -> u64 {
        self.lock().total_size
    }

    pub fn set_total_size(&self, total: u64) {
        self.lock().total_size = total;
    }

    /// Most recent non-cancellation task error.
    pub fn last_error(&self) -> Option<DownloadError> {
        self.lock().last_error.clone()
    }

    /// Ordered, read-only view of the tasks.
    pub fn tasks(&self) -> Vec<Arc<DownloadTask>> {
        self.lock().tasks.clone()
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn tasks_enqueued(&self) -> usize {
        self.lock().tasks_enqueued
    }

    pub fn tasks_finished(&self) -> usize {
        self.lock().tasks_finished
    }

    pub fn progress(&self) -> JobProgress {
        let agg = self.lock();
        JobProgress {
            current_bytes: agg.current_size(),
            total_bytes: agg.total_size,
            elapsed_secs: agg
                .started_at
                .map_or(0.0, |t| t.elapsed().as_secs_f64()),
            tasks_finished: agg.tasks_finished,
            tasks_enqueued: agg.tasks_enqueued,
            task_count: agg.tasks.len(),
        }
    }

    /// Receive task completions and state changes from here on.
    pub fn subscribe(&self) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Block until the job is no longer `Running`.
    pub fn wait(&self) -> JobState {
        let agg = self.lock();
        let agg = self
            .shared
            .changed
            .wait_while(agg, |a| a.state == JobState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        agg.state
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning None.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobState> {
        let agg = self.lock();
        let (agg, result) = self
            .shared
            .changed
            .wait_timeout_while(agg, timeout, |a| a.state == JobState::Running)
            .unwrap_or_else(PoisonError::into_inner);
        (!result.timed_out()).then_some(agg.state)
    }

    /// Block until every submission (including cancelled ones) has reported
    /// back, or `timeout` elapses. Returns true when idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let agg = self.lock();
        let (_agg, result) = self
            .shared
            .changed
            .wait_timeout_while(agg, timeout, |a| !a.idle())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        if self.state() == JobState::Running {
            tracing::debug!("job dropped while running, cancelling outstanding work");
            self.stop();
        }
    }
}

impl std::fmt::Debug for DownloadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let agg = self.lock();
        f.debug_struct("DownloadJob")
            .field("state", &agg.state)
            .field("tasks", &agg.tasks.len())
            .field("tasks_enqueued", &agg.tasks_enqueued)
            .field("tasks_finished", &agg.tasks_finished)
            .field("total_size", &agg.total_size)
            .finish()
    }
}
