use crate::error::{Result, SyncError};
use std::fs::{File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock file created in the destination root; it is never deleted
pub const LOCK_FILENAME: &str = ".blackvuesync.lock";

/// Exclusive advisory lock keeping concurrent runs off the same destination.
///
/// The lock belongs to the open file description, so it is released when this
/// value is dropped or the process exits, however that happens.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock without waiting; fails with [`SyncError::AlreadyRunning`] when held
    pub fn acquire(destination: &Path) -> Result<Self> {
        let path = destination.join(LOCK_FILENAME);

        // Writable by everyone so runs under different users share one lock file
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o666)
            .open(&path)?;
        if let Err(e) = file.set_permissions(Permissions::from_mode(0o666)) {
            debug!("Could not relax lock file permissions {}: {}", path.display(), e);
        }

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(SyncError::AlreadyRunning(destination.to_path_buf()));
            }
            return Err(err.into());
        }

        debug!("Acquired lock: {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock; dropping does the same
    pub fn release(self) {}
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(
                "Failed to release lock {}: {}",
                self.path.display(),
                io::Error::last_os_error()
            );
        } else {
            debug!("Released lock: {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp_dir = TempDir::new().unwrap();

        let lock = InstanceLock::acquire(temp_dir.path()).unwrap();
        assert_eq!(lock.path(), temp_dir.path().join(LOCK_FILENAME));

        let err = InstanceLock::acquire(temp_dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::AlreadyRunning(ref p) if p == temp_dir.path()));
    }

    #[test]
    fn test_release_allows_reacquire_and_keeps_file() {
        let temp_dir = TempDir::new().unwrap();

        let lock = InstanceLock::acquire(temp_dir.path()).unwrap();
        lock.release();
        assert!(temp_dir.path().join(LOCK_FILENAME).exists());

        {
            let _lock = InstanceLock::acquire(temp_dir.path()).unwrap();
        }
        InstanceLock::acquire(temp_dir.path()).unwrap();
    }

    #[test]
    fn test_missing_destination_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = InstanceLock::acquire(&temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
