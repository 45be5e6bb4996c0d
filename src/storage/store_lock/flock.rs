//! Non-blocking advisory file locks.
//!
//! Locks are held per open file description, so two handles to the same file exclude each other
//! even within one process. Closing a handle releases its lock.

use std::fs::File;

/// Whether `flock` based locking is available on this platform.
pub(crate) const SUPPORTED: bool = cfg!(unix);

/// Try to take a shared or exclusive lock on `file` without blocking.
///
/// Returns `Ok(false)` if the lock is held elsewhere.
#[cfg(unix)]
pub(crate) fn try_lock(file: &File, exclusive: bool) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let operation = if exclusive {
        libc::LOCK_EX
    } else {
        libc::LOCK_SH
    } | libc::LOCK_NB;
    // SAFETY: the file descriptor is owned by `file` and is open for the duration of the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if result == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted => Ok(false),
        _ => Err(err),
    }
}

/// Without `flock`, every lock attempt trivially succeeds.
#[cfg(not(unix))]
pub(crate) fn try_lock(_file: &File, _exclusive: bool) -> std::io::Result<bool> {
    Ok(true)
}

/// Release a lock taken with [`try_lock`].
#[cfg(unix)]
pub(crate) fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as for `try_lock`. Failure is harmless since closing the file releases the lock.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
pub(crate) fn unlock(_file: &File) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn flock_exclusive() -> Result<(), Box<dyn std::error::Error>> {
        let file = tempfile::NamedTempFile::new()?;
        let a = File::open(file.path())?;
        let b = File::open(file.path())?;
        assert!(try_lock(&a, true)?);
        assert!(!try_lock(&b, true)?);
        assert!(!try_lock(&b, false)?);
        unlock(&a);
        assert!(try_lock(&b, false)?);
        assert!(try_lock(&a, false)?);
        Ok(())
    }
}
