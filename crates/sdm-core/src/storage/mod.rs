//! Filesystem side of a download: the interim file and its atomic publish.
//!
//! A fetch is staged at the interim path and only renamed onto the destination
//! once the whole body is on disk, so the destination holds a complete file or
//! nothing. Interim and destination must live on the same filesystem.

mod interim;

pub use interim::InterimFile;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Suffix appended to the destination to form the default interim path.
pub const INTERIM_SUFFIX: &str = ".part";

/// Default interim path: the destination with `.part` appended (`a.iso` → `a.iso.part`).
pub fn interim_path(destination: &Path) -> PathBuf {
    let mut o = destination.as_os_str().to_owned();
    o.push(INTERIM_SUFFIX);
    PathBuf::from(o)
}

/// Length of the file at `destination` if it is a readable regular file.
pub fn destination_len(destination: &Path) -> Option<u64> {
    let file = fs::File::open(destination).ok()?;
    let meta = file.metadata().ok()?;
    meta.is_file().then(|| meta.len())
}

/// Atomically move `interim` onto `destination`, creating the destination's
/// parent directory if needed. Fails if the two are on different filesystems.
pub fn publish(interim: &Path, destination: &Path) -> io::Result<()> {
    ensure_parent(destination)?;
    fs::rename(interim, destination)
}

pub(crate) fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
