//! Bounded-concurrency FIFO work queue backed by OS threads.
//!
//! Work items are blocking closures (a fetch occupies its worker for the whole
//! transfer). Workers are spawned on demand up to `max_concurrent` and exit
//! once the queue drains, so an idle queue holds no threads.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

type Work = Box<dyn FnOnce() + Send + 'static>;

/// Shared work queue. Cloning yields another handle to the same queue, so one
/// queue can serve several jobs under a single concurrency bound.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

struct Shared {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Work>,
    workers: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkQueue {
    /// Create a queue running at most `max_concurrent` items at once (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    /// Worker threads currently alive (busy or about to pick up work).
    pub fn active_workers(&self) -> usize {
        self.shared.lock().workers
    }

    /// Items waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Append `work` to the queue. Never blocks on the work itself, unless no
    /// worker thread can be started at all; then the caller drains the queue.
    pub fn push<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.push_with(work, spawn_thread);
    }

    fn push_with<F, S>(&self, work: F, spawn: S)
    where
        F: FnOnce() + Send + 'static,
        S: FnOnce(Arc<Shared>) -> io::Result<()>,
    {
        let reserved = {
            let mut state = self.shared.lock();
            state.pending.push_back(Box::new(work));
            if state.workers < self.shared.max_concurrent {
                state.workers += 1;
                true
            } else {
                false
            }
        };
        if !reserved {
            return;
        }
        let Err(e) = spawn(Arc::clone(&self.shared)) else {
            return;
        };

        let run_inline = {
            let mut state = self.shared.lock();
            tracing::error!(
                error = %e,
                pending = state.pending.len(),
                "failed to spawn queue worker"
            );
            // With no other worker alive nothing would ever drain the queue.
            if state.workers == 1 {
                true
            } else {
                state.workers -= 1;
                false
            }
        };
        if run_inline {
            tracing::warn!("running queued work on the calling thread");
            worker_loop(&self.shared);
        }
    }
}

fn spawn_thread(shared: Arc<Shared>) -> io::Result<()> {
    thread::Builder::new()
        .name("sdm-worker".to_string())
        .spawn(move || worker_loop(&shared))
        .map(drop)
}

fn worker_loop(shared: &Shared) {
    loop {
        let work = {
            let mut state = shared.lock();
            match state.pending.pop_front() {
                Some(w) => w,
                None => {
                    state.workers -= 1;
                    break;
                }
            }
        };
        if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
            tracing::error!("queued work panicked; worker continues");
        }
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WorkQueue")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("workers", &state.workers)
            .field("pending", &state.pending.len())
            .finish()
    }
}
