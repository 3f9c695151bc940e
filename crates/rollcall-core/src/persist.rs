//! Crash-safe file replacement and advisory locking.
//!
//! Writers go to a temp file in the target's directory, fsync, then rename
//! over the target, so readers only ever see the old or the new contents.
//! Concurrent processes are serialized with `flock(2)` on a sidecar
//! `<target>.lock` file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock held until dropped.
///
/// Closing the descriptor releases the `flock`.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until an exclusive lock on `<target>.lock` is acquired.
    pub fn exclusive(target: &Path) -> io::Result<Self> {
        let path = lock_path(target);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        // SAFETY: the fd is valid for the lifetime of `file`, and flock
        // takes no pointers.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        tracing::trace!(lock = %path.display(), "acquired exclusive lock");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// Replace `target` with whatever `write` produces, atomically.
///
/// On error the temp file is removed and `target` is left untouched.
pub fn write_atomic<F>(target: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    replace_with(target, true, write)
}

/// Like [`write_atomic`] but without the fsync.
///
/// Readers still never see a torn file, but the new contents may be lost
/// on power failure. For throwaway outputs rewritten many times a second.
pub fn write_replace<F>(target: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    replace_with(target, false, write)
}

fn replace_with<F>(target: &Path, durable: bool, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    if durable {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
