//! Batch manifests: a list of downloads described in TOML or JSON.
//!
//! ```toml
//! total_size = 250000
//!
//! [[download]]
//! url = "https://mirror.example/pool/a.deb"
//! destination = "pool/a.deb"
//! interim = "tmp/a.deb.part"   # optional
//! ```
//!
//! Relative paths are resolved against the manifest's directory.

use crate::task::DownloadTask;
use crate::transport::Transport;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    pub destination: PathBuf,
    /// Defaults to `<destination>.part`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interim: Option<PathBuf>,
}

impl ManifestEntry {
    pub fn to_task(&self, transport: Arc<dyn Transport>) -> DownloadTask {
        let task = DownloadTask::new(self.url.clone(), self.destination.clone());
        let task = match &self.interim {
            Some(interim) => task.with_interim_path(interim.clone()),
            None => task,
        };
        task.with_transport(transport)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Expected total bytes, reported to the job for progress display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
    #[serde(default, rename = "download")]
    pub downloads: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Read a manifest (`.json` is JSON, anything else TOML), resolve its
    /// relative paths, and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let mut manifest = if is_json {
            Self::from_json_str(&data)
        } else {
            Self::from_toml_str(&data)
        }
        .with_context(|| format!("parsing manifest {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.resolve_relative_to(base);
        manifest.validate()?;
        tracing::debug!(
            path = %path.display(),
            downloads = manifest.downloads.len(),
            "loaded manifest"
        );
        Ok(manifest)
    }

    /// Join every relative destination and interim path onto `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for entry in &mut self.downloads {
            if entry.destination.is_relative() {
                entry.destination = base.join(&entry.destination);
            }
            if let Some(interim) = entry.interim.as_mut().filter(|p| p.is_relative()) {
                *interim = base.join(&*interim);
            }
        }
    }

    /// Reject entries that would race on the same file.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, entry) in self.downloads.iter().enumerate() {
            if entry.url.trim().is_empty() {
                bail!("download #{}: empty url", i + 1);
            }
            let interim = entry
                .interim
                .clone()
                .unwrap_or_else(|| crate::storage::interim_path(&entry.destination));
            if interim == entry.destination {
                bail!(
                    "download #{}: interim path equals destination {}",
                    i + 1,
                    entry.destination.display()
                );
            }
            for path in [&entry.destination, &interim] {
                if !seen.insert(path.clone()) {
                    bail!("download #{}: path {} used twice", i + 1, path.display());
                }
            }
        }
        Ok(())
    }
}
