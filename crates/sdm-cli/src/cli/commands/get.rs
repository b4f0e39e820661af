//! `sdm get` – download URLs into a directory.

use anyhow::{Context, Result};
use sdm_core::config::SdmConfig;
use sdm_core::url_model;
use sdm_core::DownloadTask;
use std::fs;
use std::path::Path;

use super::runner;
use crate::cli::JobArgs;

pub fn run_get(cfg: &SdmConfig, urls: &[String], dir: &Path, args: &JobArgs) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let transport = runner::transport(cfg);
    let tasks = urls
        .iter()
        .zip(url_model::destinations_for(urls, dir))
        .map(|(url, dest)| DownloadTask::new(url.clone(), dest).with_transport(transport.clone()))
        .collect();
    let job = runner::build_job(cfg, args, tasks, None)?;
    tracing::info!(files = urls.len(), dir = %dir.display(), "get");
    runner::run_and_report(&job, &runner::retry_policy(cfg, args))
}
