//! Download task: one URL to one destination path.
//!
//! A task owns at most one [`FetchOperation`] at a time. It skips the network
//! entirely when the destination already exists and publishes a finished
//! fetch by renaming the interim file onto the destination.

use crate::error::DownloadError;
use crate::operation::{FetchOperation, OperationState};
use crate::queue::WorkQueue;
use crate::storage;
use crate::transport::{CurlTransport, Transport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Terminal result of one submission: bytes published, or the error.
pub type TaskOutcome = Result<u64, DownloadError>;

/// Callback fired once per submission, possibly from a worker thread.
pub type CompletionCallback = Arc<dyn Fn(&TaskOutcome) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NeverQueued,
    /// An operation is in the queue or executing.
    Queued,
    /// The last submission reached a terminal outcome (see `last_error`).
    Finished,
}

/// What [`DownloadTask::submit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A fresh operation was handed to the queue.
    Queued,
    /// The destination already existed; finished synchronously, no network I/O.
    AlreadyPresent,
    /// No-op: an operation is already outstanding.
    AlreadyQueued,
    /// No-op: the task already finished successfully.
    AlreadyFinished,
}

impl Submission {
    /// True when this submission will produce a completion callback.
    pub fn is_new(self) -> bool {
        matches!(self, Submission::Queued | Submission::AlreadyPresent)
    }
}

struct TaskInner {
    state: TaskState,
    operation: Option<Arc<FetchOperation>>,
    progress: u64,
    /// Bytes of a successful finish not yet taken by the job hook.
    unreported: Option<u64>,
    last_error: Option<DownloadError>,
    on_complete: Option<CompletionCallback>,
    job_hook: Option<CompletionCallback>,
}

pub struct DownloadTask {
    url: String,
    destination_path: PathBuf,
    interim_path: PathBuf,
    transport: Arc<dyn Transport>,
    verbose: AtomicBool,
    inner: Mutex<TaskInner>,
}

impl DownloadTask {
    /// Task fetching `url` into `destination_path` over the default curl
    /// transport, staging at `<destination>.part`.
    pub fn new(url: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        let destination_path = destination_path.into();
        Self {
            url: url.into(),
            interim_path: storage::interim_path(&destination_path),
            destination_path,
            transport: Arc::new(CurlTransport::default()),
            verbose: AtomicBool::new(false),
            inner: Mutex::new(TaskInner {
                state: TaskState::NeverQueued,
                operation: None,
                progress: 0,
                unreported: None,
                last_error: None,
                on_complete: None,
                job_hook: None,
            }),
        }
    }

    /// Stage the download at `interim_path` instead of the `.part` default.
    /// Must be on the same filesystem as the destination.
    pub fn with_interim_path(mut self, interim_path: impl Into<PathBuf>) -> Self {
        self.interim_path = interim_path.into();
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log lifecycle at info level instead of debug.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Register the completion callback, replacing any previous one.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&TaskOutcome) + Send + Sync + 'static,
    {
        self.lock().on_complete = Some(Arc::new(callback));
    }

    pub(crate) fn set_job_hook(&self, hook: CompletionCallback) {
        self.lock().job_hook = Some(hook);
    }

    /// Start work for this task unless it is queued or already done.
    ///
    /// A task that finished with an error (including cancellation) can be
    /// submitted again; the fetch restarts from the beginning.
    pub fn submit(self: &Arc<Self>, queue: &WorkQueue) -> Submission {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Queued => return Submission::AlreadyQueued,
            TaskState::Finished if inner.last_error.is_none() => {
                return Submission::AlreadyFinished
            }
            _ => {}
        }

        if let Some(len) = storage::destination_len(&self.destination_path) {
            inner.state = TaskState::Finished;
            inner.progress = len;
            inner.unreported = Some(len);
            inner.last_error = None;
            inner.operation = None;
            let callbacks = Callbacks::take_from(&inner);
            drop(inner);
            self.log_lifecycle(format_args!("destination present ({len} bytes), skipping fetch"));
            callbacks.fire(&Ok(len));
            return Submission::AlreadyPresent;
        }

        let operation = Arc::new(FetchOperation::new(
            &self.url,
            &self.interim_path,
            Arc::clone(&self.transport),
        ));
        inner.state = TaskState::Queued;
        inner.operation = Some(Arc::clone(&operation));
        inner.unreported = None;
        drop(inner);

        self.log_lifecycle(format_args!("queued"));
        let task = Arc::clone(self);
        queue.push(move || {
            operation.execute();
            task.operation_finished(&operation);
        });
        Submission::Queued
    }

    /// Terminal callback of the operation: publish or record the error,
    /// leave `Queued`, fire callbacks exactly once.
    fn operation_finished(&self, operation: &FetchOperation) {
        let outcome = match operation.error() {
            Some(e) => Err(e),
            None => match storage::publish(operation.interim_path(), &self.destination_path) {
                Ok(()) => Ok(operation.progress()),
                Err(e) => Err(DownloadError::filesystem(&self.destination_path, e)),
            },
        };

        let callbacks = {
            let mut inner = self.lock();
            match outcome {
                Ok(bytes) => {
                    inner.progress = bytes;
                    inner.unreported = Some(bytes);
                    inner.last_error = None;
                }
                Err(ref e) => inner.last_error = Some(e.clone()),
            }
            inner.state = TaskState::Finished;
            inner.operation = None;
            Callbacks::take_from(&inner)
        };

        match outcome {
            Ok(bytes) => self.log_lifecycle(format_args!("published {bytes} bytes")),
            Err(DownloadError::Cancelled) => self.log_lifecycle(format_args!("cancelled")),
            Err(ref e) => tracing::warn!(url = %self.url, error = %e, "download failed"),
        }
        callbacks.fire(&outcome);
    }

    /// Cancel the active operation, if any. Returns immediately; the task
    /// finishes later through the normal completion path.
    pub fn cancel(&self) {
        let operation = self.lock().operation.clone();
        if let Some(op) = operation {
            op.cancel();
        }
    }

    /// Live byte count while queued, recorded bytes once finished, 0 before.
    pub fn progress(&self) -> u64 {
        let inner = self.lock();
        match inner.state {
            TaskState::NeverQueued => 0,
            TaskState::Queued => inner.operation.as_ref().map_or(0, |op| op.progress()),
            TaskState::Finished => inner.progress,
        }
    }

    /// Bytes not yet accounted for by the job: the live count of the
    /// outstanding operation, or a successful finish the job hook has not
    /// taken yet.
    pub(crate) fn in_flight_progress(&self) -> Option<u64> {
        let inner = self.lock();
        match inner.state {
            TaskState::Queued => inner.operation.as_ref().map(|op| op.progress()),
            TaskState::Finished => inner.unreported,
            TaskState::NeverQueued => None,
        }
    }

    /// Hand the bytes of the last successful finish over to the job.
    pub(crate) fn take_unreported(&self) -> Option<u64> {
        self.lock().unreported.take()
    }

    /// Whether `progress()` reflects real transfer state yet.
    pub fn progress_known(&self) -> bool {
        self.state() != TaskState::NeverQueued
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn queued(&self) -> bool {
        self.state() == TaskState::Queued
    }

    pub fn finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Finished and published (or found present) without error.
    pub fn succeeded(&self) -> bool {
        let inner = self.lock();
        inner.state == TaskState::Finished && inner.last_error.is_none()
    }

    pub fn last_error(&self) -> Option<DownloadError> {
        self.lock().last_error.clone()
    }

    /// State of the outstanding operation, if one exists.
    pub fn operation_state(&self) -> Option<OperationState> {
        self.lock().operation.as_ref().map(|op| op.state())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination_path(&self) -> &Path {
        &self.destination_path
    }

    pub fn interim_path(&self) -> &Path {
        &self.interim_path
    }

    fn log_lifecycle(&self, message: std::fmt::Arguments<'_>) {
        if self.verbose() {
            tracing::info!(url = %self.url, dest = %self.destination_path.display(), "{}", message);
        } else {
            tracing::debug!(url = %self.url, dest = %self.destination_path.display(), "{}", message);
        }
    }
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("DownloadTask")
            .field("url", &self.url)
            .field("destination_path", &self.destination_path)
            .field("interim_path", &self.interim_path)
            .field("state", &inner.state)
            .field("last_error", &inner.last_error)
            .finish()
    }
}

/// Callbacks snapshotted under the task lock and fired after it is released.
struct Callbacks {
    job_hook: Option<CompletionCallback>,
    on_complete: Option<CompletionCallback>,
}

impl Callbacks {
    fn take_from(inner: &TaskInner) -> Self {
        Self {
            job_hook: inner.job_hook.clone(),
            on_complete: inner.on_complete.clone(),
        }
    }

    fn fire(self, outcome: &TaskOutcome) {
        if let Some(hook) = self.job_hook {
            hook(outcome);
        }
        if let Some(cb) = self.on_complete {
            cb(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, NetworkFailure};
    use crate::transport::testing::{Script, ScriptedTransport};
    use std::fs;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    const URL: &str = "http://example.test/a.bin";

    fn scripted_task(dir: &Path, transport: &Arc<ScriptedTransport>) -> Arc<DownloadTask> {
        let transport: Arc<dyn Transport> = transport.clone();
        Arc::new(DownloadTask::new(URL, dir.join("a.bin")).with_transport(transport))
    }

    fn completion_channel(task: &DownloadTask) -> mpsc::Receiver<TaskOutcome> {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        task.on_complete(move |outcome| {
            let _ = tx.lock().unwrap().send(outcome.clone());
        });
        rx
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn successful_fetch_publishes_destination() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let body = transport.body(URL, 200_000);
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);
        let queue = WorkQueue::new(2);

        assert_eq!(task.progress(), 0);
        assert!(!task.progress_known());
        assert_eq!(task.submit(&queue), Submission::Queued);

        let outcome = done.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.unwrap(), 200_000);
        assert!(task.finished() && task.succeeded());
        assert!(!task.queued());
        assert_eq!(task.progress(), 200_000);
        assert!(task.last_error().is_none());
        assert_eq!(fs::read(task.destination_path()).unwrap(), body);
        assert!(!task.interim_path().exists());
    }

    #[test]
    fn double_submit_enqueues_once() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Script::Stall { prefix: vec![1; 10] });
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);
        let queue = WorkQueue::new(2);

        assert_eq!(task.submit(&queue), Submission::Queued);
        assert_eq!(task.submit(&queue), Submission::AlreadyQueued);
        wait_for(|| transport.calls(URL) == 1);

        task.cancel();
        assert!(done.recv_timeout(Duration::from_secs(5)).unwrap().is_err());
        assert_eq!(transport.calls(URL), 1);
        assert!(done.try_recv().is_err(), "callback fired more than once");
    }

    #[test]
    fn submit_after_success_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.body(URL, 10);
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);
        let queue = WorkQueue::new(1);

        task.submit(&queue);
        done.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(task.submit(&queue), Submission::AlreadyFinished);
        assert_eq!(transport.calls(URL), 1);
    }

    #[test]
    fn present_destination_skips_network() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.body(URL, 10);
        let task = scripted_task(dir.path(), &transport);
        fs::write(task.destination_path(), b"already here").unwrap();
        let done = completion_channel(&task);

        assert_eq!(task.submit(&WorkQueue::new(1)), Submission::AlreadyPresent);

        // Fired synchronously, before submit returned.
        assert_eq!(done.try_recv().unwrap().unwrap(), 12);
        assert!(task.succeeded());
        assert_eq!(task.progress(), 12);
        assert_eq!(transport.calls(URL), 0);
        assert_eq!(fs::read(task.destination_path()).unwrap(), b"already here");
    }

    #[test]
    fn failure_records_error_and_leaves_destination_absent() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Script::Fail(NetworkFailure::Connection("refused".into())));
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);

        task.submit(&WorkQueue::new(1));
        let err = done.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();

        assert_eq!(err.kind(), FailureKind::Network);
        assert!(task.finished());
        assert!(!task.succeeded());
        assert_eq!(task.last_error().map(|e| e.kind()), Some(FailureKind::Network));
        assert!(!task.destination_path().exists());
    }

    #[test]
    fn failed_task_can_be_resubmitted() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Script::Fail(NetworkFailure::Http(503)));
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);
        let queue = WorkQueue::new(1);

        task.submit(&queue);
        assert!(done.recv_timeout(Duration::from_secs(5)).unwrap().is_err());

        transport.body(URL, 64);
        assert_eq!(task.submit(&queue), Submission::Queued);
        assert_eq!(done.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), 64);
        assert!(task.succeeded());
        assert!(task.last_error().is_none());
        assert_eq!(transport.calls(URL), 2);
    }

    #[test]
    fn live_progress_while_queued_and_cancel_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Script::Stall { prefix: vec![0; 4096] });
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);

        task.submit(&WorkQueue::new(1));
        wait_for(|| task.progress() == 4096);
        assert!(task.queued());
        assert!(task.progress_known());
        assert_eq!(task.operation_state(), Some(OperationState::Executing));

        let started = Instant::now();
        task.cancel();
        assert!(started.elapsed() < Duration::from_millis(500));

        let err = done.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert!(task.finished());
        assert!(task.last_error().unwrap().is_cancelled());
        assert!(task.operation_state().is_none());
        assert!(!task.destination_path().exists());
    }

    #[test]
    fn cancel_without_operation_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let task = scripted_task(dir.path(), &transport);
        task.cancel();
        assert_eq!(task.state(), TaskState::NeverQueued);
    }

    #[test]
    fn publish_failure_is_filesystem_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.body(URL, 32);
        // Destination's parent is a regular file, so the rename cannot happen.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let transport_dyn: Arc<dyn Transport> = transport.clone();
        let task = Arc::new(
            DownloadTask::new(URL, blocker.join("a.bin"))
                .with_interim_path(dir.path().join("a.bin.part"))
                .with_transport(transport_dyn),
        );
        let done = completion_channel(&task);

        task.submit(&WorkQueue::new(1));
        let err = done.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Filesystem);
        assert!(!task.succeeded());
    }

    #[test]
    fn default_interim_is_part_file() {
        let task = DownloadTask::new(URL, "/tmp/out/a.bin");
        assert_eq!(task.interim_path(), Path::new("/tmp/out/a.bin.part"));
        assert_eq!(task.url(), URL);
        assert_eq!(task.destination_path(), Path::new("/tmp/out/a.bin"));
    }

    #[test]
    fn finished_bytes_stay_in_flight_until_job_takes_them() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.body(URL, 4_096);
        let task = scripted_task(dir.path(), &transport);

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let weak = Arc::downgrade(&task);
        task.set_job_hook(Arc::new(move |_outcome: &TaskOutcome| {
            let task = weak.upgrade().unwrap();
            let seen = (task.state(), task.in_flight_progress());
            let _ = tx.lock().unwrap().send(seen);
        }));

        task.submit(&WorkQueue::new(1));
        let (state, in_flight) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(state, TaskState::Finished);
        assert_eq!(in_flight, Some(4_096));

        assert_eq!(task.take_unreported(), Some(4_096));
        assert_eq!(task.in_flight_progress(), None);
        assert_eq!(task.progress(), 4_096);
    }

    #[test]
    fn failed_finish_leaves_nothing_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        transport.script(URL, Script::Fail(NetworkFailure::Http(500)));
        let task = scripted_task(dir.path(), &transport);
        let done = completion_channel(&task);

        task.submit(&WorkQueue::new(1));
        assert!(done.recv_timeout(Duration::from_secs(5)).unwrap().is_err());
        assert_eq!(task.in_flight_progress(), None);
    }
}
