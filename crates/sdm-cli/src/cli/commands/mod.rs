//! CLI command handlers, one per file, plus the shared job runner.

mod batch;
mod config;
mod get;
mod runner;

pub use batch::run_batch;
pub use config::run_config;
pub use get::run_get;
