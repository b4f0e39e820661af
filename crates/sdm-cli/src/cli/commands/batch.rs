//! `sdm batch` – download everything in a manifest.

use anyhow::Result;
use sdm_core::config::SdmConfig;
use sdm_core::manifest::Manifest;
use std::path::Path;

use super::runner;
use crate::cli::JobArgs;

pub fn run_batch(cfg: &SdmConfig, manifest_path: &Path, args: &JobArgs) -> Result<()> {
    let manifest = Manifest::load(manifest_path)?;
    if manifest.downloads.is_empty() {
        println!("Manifest {} lists no downloads.", manifest_path.display());
        return Ok(());
    }
    let transport = runner::transport(cfg);
    let tasks = manifest
        .downloads
        .iter()
        .map(|entry| entry.to_task(transport.clone()))
        .collect();
    let job = runner::build_job(cfg, args, tasks, manifest.total_size)?;
    tracing::info!(
        manifest = %manifest_path.display(),
        files = manifest.downloads.len(),
        "batch"
    );
    runner::run_and_report(&job, &runner::retry_policy(cfg, args))
}
