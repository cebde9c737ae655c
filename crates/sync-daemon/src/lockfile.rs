//! The inter-process advisory lock preventing two daemons from attaching to
//! the same sync root.

use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// An exclusive, advisory lock on a single file, released automatically on
/// drop (including on process crash, since it is held via the OS's own
/// advisory-lock table rather than file contents).
///
/// The holding process's PID is written into the lock file itself once the
/// `flock` is acquired, so any process (including the one that failed to
/// acquire it) can discover who holds it with [`RootLock::holder_pid`] —
/// `fs2`'s portable advisory lock has no `fcntl`/`F_GETLK`-style query of its
/// own, so the PID is recorded in the file contents instead.
pub struct RootLock {
    _file: File,
    path: PathBuf,
}

impl RootLock {
    /// Attempts to acquire the lock at `path` (typically
    /// `<sync_root>/.dropsync.lock`), creating the file if needed, and
    /// records this process's PID into it.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] of kind [`io::ErrorKind::WouldBlock`] if
    /// another process already holds the lock, or any other I/O error if
    /// the file could not be opened or written.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        if file.try_lock_exclusive().is_err() {
            let holder = Self::holder_pid(&path).ok().flatten();
            let message = match holder {
                Some(pid) => format!("sync root at {} is already locked by pid {pid}", path.display()),
                None => format!("sync root at {} is already locked by another process", path.display()),
            };
            return Err(io::Error::new(io::ErrorKind::WouldBlock, message));
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(Self { _file: file, path })
    }

    /// Reads the PID recorded by whichever process currently holds (or most
    /// recently held) the lock file at `path`.
    ///
    /// Returns `Ok(None)` if the file does not exist or its contents are not
    /// a valid PID (for example, a lock file from a version of the daemon
    /// that did not yet record one).
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file exists but could not be read.
    pub fn holder_pid(path: impl AsRef<Path>) -> io::Result<Option<u32>> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(contents.trim().parse().ok()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// The lock file's path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_second_acquisition_in_the_same_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dropsync.lock");

        let first = RootLock::acquire(&path).unwrap();
        let second = RootLock::acquire(&path);
        assert!(second.is_err());
        drop(first);
    }

    #[test]
    fn releasing_the_lock_allows_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dropsync.lock");

        let first = RootLock::acquire(&path).unwrap();
        drop(first);

        let second = RootLock::acquire(&path);
        assert!(second.is_ok());
    }

    #[test]
    fn holder_pid_reports_the_acquiring_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dropsync.lock");

        let lock = RootLock::acquire(&path).unwrap();
        assert_eq!(RootLock::holder_pid(&path).unwrap(), Some(std::process::id()));
        drop(lock);
    }

    #[test]
    fn holder_pid_is_none_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dropsync.lock");
        assert_eq!(RootLock::holder_pid(&path).unwrap(), None);
    }

    #[test]
    fn failed_acquisition_names_the_holder_pid_in_its_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dropsync.lock");

        let first = RootLock::acquire(&path).unwrap();
        let err = RootLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains(&std::process::id().to_string()));
        drop(first);
    }
}
