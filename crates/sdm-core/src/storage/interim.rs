//! Interim file written in one go once a fetch has fully arrived.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Staging file for a completed fetch. Call `preallocate`, `write_all`, then
/// `sync` before publishing.
pub struct InterimFile {
    file: File,
    path: PathBuf,
}

impl InterimFile {
    /// Create (or truncate) the interim file, creating its parent directory.
    pub fn create(path: &Path) -> io::Result<Self> {
        super::ensure_parent(path)?;
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(InterimFile {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Reserve `size` bytes. On Unix tries `posix_fallocate` so a full disk
    /// fails here rather than mid-write; falls back to `set_len`.
    pub fn preallocate(&mut self, size: u64) -> io::Result<()> {
        if size == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            let fd = self.file.as_raw_fd();
            let r = unsafe { libc::posix_fallocate(fd, 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, "posix_fallocate failed, falling back to set_len");
        }
        self.file.set_len(size)
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    /// Flush file data to disk so the later rename publishes durable bytes.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
