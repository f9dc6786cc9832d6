use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{DeployError, DeployResult, ResultExt};

/// Exclusive advisory lock over an installation, held for the
/// lifetime of the value. Dropping it releases the lock.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Take the lock without blocking. Fails with
    /// [`DeployError::LockHeld`] when another process holds it.
    pub fn acquire(path: &Path) -> DeployResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        try_lock(&file).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                DeployError::LockHeld(path.to_path_buf())
            } else {
                DeployError::Io(e).context(format!("locking {}", path.display()))
            }
        })?;

        log::debug!("acquired install lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        unlock(&self.file);
        log::debug!("released install lock {}", self.path.display());
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and open for the
    // duration of the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn unlock(file: &File) {
    use std::os::fd::AsRawFd;

    // SAFETY: as above; closing the descriptor would also release it.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// No advisory locking primitive without libc; runs are unguarded.
#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
