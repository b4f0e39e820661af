//! CLI for the SDM download manager.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sdm_core::config;
use std::path::PathBuf;

use commands::{run_batch, run_config, run_get};

/// Top-level CLI for the SDM download manager.
#[derive(Debug, Parser)]
#[command(name = "sdm")]
#[command(about = "SDM: concurrent multi-file download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Options shared by every command that runs a job.
#[derive(Debug, Clone, Default, Args)]
pub struct JobArgs {
    /// Download at most N files at once (default from config).
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,
    /// Expected total size in bytes, for percentage and ETA.
    #[arg(long, value_name = "BYTES")]
    pub total_size: Option<u64>,
    /// Restart the job up to N times after retryable failures (default from config).
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
    /// Log every task's lifecycle at info level.
    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs into a directory.
    Get {
        /// Direct HTTP/HTTPS URLs to download.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Destination directory (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        #[command(flatten)]
        job: JobArgs,
    },

    /// Download everything listed in a TOML or JSON manifest.
    Batch {
        /// Path to the manifest (`.json` for JSON, otherwise TOML).
        manifest: PathBuf,
        #[command(flatten)]
        job: JobArgs,
    },

    /// Show the config file path and effective settings.
    Config,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get { urls, dir, job } => {
                let dir = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                run_get(&cfg, &urls, &dir, &job)?;
            }
            CliCommand::Batch { manifest, job } => run_batch(&cfg, &manifest, &job)?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}
