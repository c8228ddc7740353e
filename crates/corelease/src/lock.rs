use crate::error::{LeaseError, Result};
use corelease_common::log;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Host-wide exclusive lock held for the lifetime of the guard.
///
/// Backed by `flock(2)` on a well-known lock file. The kernel drops the lock
/// when the descriptor closes, which also covers a process that dies while
/// holding it. Locks belong to the open file description, so two guards in
/// the same process exclude each other just like two processes do.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock, blocking indefinitely when `timeout` is `None`.
    #[tracing::instrument(level = "debug", name = "Acquire lease lock", skip_all, fields(path = %path.display(), timeout = ?timeout))]
    pub fn acquire(path: &Path, timeout: Option<Duration>) -> Result<Self> {
        let file = open_lock_file(path)?;
        let lock_failed = |source| LeaseError::LockFailed {
            path: path.to_path_buf(),
            source,
        };

        match timeout {
            None => flock_exclusive(&file).map_err(lock_failed)?,
            Some(timeout) => {
                let start = Instant::now();
                while !try_flock_exclusive(&file).map_err(lock_failed)? {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        log!(warn, "Gave up waiting for {} after {:?}", path.display(), waited);
                        return Err(LeaseError::LockTimeout {
                            path: path.to_path_buf(),
                            waited,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL.min(timeout - waited));
                }
            }
        }

        log!(debug, "Acquired lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = unlock(&self.file) {
            // closing the descriptor below releases it anyway
            log!(warn, "Failed to unlock {}: {}", self.path.display(), e);
        }
        log!(debug, "Released lock {}", self.path.display());
    }
}

/// Run `f` while holding the lock at `path`.
pub fn with_lock<T, F>(path: &Path, timeout: Option<Duration>, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let _guard = LockGuard::acquire(path, timeout)?;
    f()
}

fn open_lock_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LeaseError::LockFailed {
            path: path.to_path_buf(),
            source,
        })?;

    // every session on the host has to be able to open the token
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o666);
        if let Err(e) = file.set_permissions(perms) {
            log!(debug, "Could not widen permissions of {}: {}", path.display(), e);
        }
    }

    Ok(file)
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    loop {
        // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Returns `Ok(false)` when another holder has the lock.
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
    let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    if err.kind() == io::ErrorKind::Interrupted {
        return Ok(false);
    }
    Err(err)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is a valid descriptor owned by `file` for the whole call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "host-wide core leases require flock(2)",
    ))
}

#[cfg(not(unix))]
fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    flock_exclusive(file).map(|_| true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}
