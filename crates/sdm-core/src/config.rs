use crate::transport::CurlOptions;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of job attempts (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Global configuration loaded from `~/.config/sdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdmConfig {
    /// Maximum number of files fetched at the same time by one job.
    pub max_concurrent_downloads: usize,
    /// Connect timeout for each transfer.
    pub connect_timeout_secs: u64,
    /// Transfers slower than this many bytes/s for `low_speed_time_secs` are aborted.
    pub low_speed_limit_bytes: u32,
    pub low_speed_time_secs: u64,
    /// Optional hard limit on a whole transfer (None = unlimited).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Optional retry policy; if missing, failed jobs are not retried.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for SdmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            connect_timeout_secs: 30,
            low_speed_limit_bytes: 1024,
            low_speed_time_secs: 60,
            timeout_secs: None,
            user_agent: None,
            retry: None,
        }
    }
}

impl SdmConfig {
    /// Transfer options for [`CurlTransport`](crate::transport::CurlTransport).
    pub fn curl_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            low_speed_limit: self.low_speed_limit_bytes,
            low_speed_time: Duration::from_secs(self.low_speed_time_secs),
            timeout: self.timeout_secs.map(Duration::from_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<SdmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = SdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: SdmConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = SdmConfig::default();
        assert_eq!(cfg.max_concurrent_downloads, 4);
        assert_eq!(cfg.connect_timeout_secs, 30);
        assert_eq!(cfg.low_speed_limit_bytes, 1024);
        assert_eq!(cfg.low_speed_time_secs, 60);
        assert!(cfg.retry.is_none());
    }

    #[test]
    fn defaults_match_transport_defaults() {
        assert_eq!(SdmConfig::default().curl_options(), CurlOptions::default());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = SdmConfig {
            user_agent: Some("sdm-test".into()),
            retry: Some(RetryConfig::default()),
            ..SdmConfig::default()
        };
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, cfg.max_concurrent_downloads);
        assert_eq!(parsed.user_agent.as_deref(), Some("sdm-test"));
        assert_eq!(parsed.retry.unwrap().max_attempts, 5);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent_downloads = 8
            connect_timeout_secs = 5
            low_speed_limit_bytes = 10
            low_speed_time_secs = 20
            timeout_secs = 600
            user_agent = "mirror-sync/1.0"

            [retry]
            max_attempts = 3
            base_delay_secs = 0.5
            max_delay_secs = 15
        "#;
        let cfg: SdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_downloads, 8);
        let retry = cfg.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert!((retry.base_delay_secs - 0.5).abs() < 1e-9);
        assert_eq!(retry.max_delay_secs, 15);

        let opts = cfg.curl_options();
        assert_eq!(opts.connect_timeout, Duration::from_secs(5));
        assert_eq!(opts.low_speed_limit, 10);
        assert_eq!(opts.low_speed_time, Duration::from_secs(20));
        assert_eq!(opts.timeout, Some(Duration::from_secs(600)));
        assert_eq!(opts.user_agent.as_deref(), Some("mirror-sync/1.0"));
    }

    #[test]
    fn optional_fields_may_be_omitted() {
        let toml = r#"
            max_concurrent_downloads = 2
            connect_timeout_secs = 30
            low_speed_limit_bytes = 1024
            low_speed_time_secs = 60
        "#;
        let cfg: SdmConfig = toml::from_str(toml).unwrap();
        assert!(cfg.timeout_secs.is_none());
        assert!(cfg.user_agent.is_none());
        assert!(cfg.retry.is_none());
    }
}
