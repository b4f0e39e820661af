pub mod config;
pub mod logging;

// Download engine: operation -> task -> job, bottom-up.
pub mod error;
pub mod job;
pub mod operation;
pub mod queue;
pub mod storage;
pub mod task;
pub mod transport;

// Layers above the engine.
pub mod manifest;
pub mod retry;
pub mod url_model;

pub use error::{DownloadError, FailureKind, JobError, NetworkFailure};
pub use job::{DownloadJob, JobEvent, JobProgress, JobState};
pub use operation::{FetchOperation, OperationState};
pub use queue::WorkQueue;
pub use task::{DownloadTask, Submission, TaskOutcome, TaskState};
pub use transport::{CurlOptions, CurlTransport, Transport};
