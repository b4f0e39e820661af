//! `sdm config` – show where the config lives and what it resolves to.

use anyhow::Result;
use sdm_core::config::{self, SdmConfig};
use sdm_core::logging;

pub fn run_config(cfg: &SdmConfig) -> Result<()> {
    println!("config file: {}", config::config_path()?.display());
    if let Ok(log) = logging::log_path() {
        println!("log file:    {}", log.display());
    }
    println!();
    println!("max_concurrent_downloads = {}", cfg.max_concurrent_downloads);
    println!("connect_timeout_secs     = {}", cfg.connect_timeout_secs);
    println!("low_speed_limit_bytes    = {}", cfg.low_speed_limit_bytes);
    println!("low_speed_time_secs      = {}", cfg.low_speed_time_secs);
    println!("timeout_secs             = {}", opt(cfg.timeout_secs));
    println!("user_agent               = {}", opt(cfg.user_agent.as_deref()));
    match &cfg.retry {
        Some(r) => println!(
            "retry                    = {} attempts, {}s base, {}s max",
            r.max_attempts, r.base_delay_secs, r.max_delay_secs
        ),
        None => println!("retry                    = off"),
    }
    Ok(())
}

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
