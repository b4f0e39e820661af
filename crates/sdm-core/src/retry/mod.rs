//! Retry and backoff policy for whole jobs.
//!
//! The engine never retries on its own. This layer classifies the errors a
//! failed job left behind and, when all of them look transient, restarts the
//! job after an exponential backoff. Restarting only resubmits tasks that did
//! not finish successfully.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_http_status, classify_network_failure};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_job;
