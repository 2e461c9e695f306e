use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Name of the lock file in the vault root
pub const LOCK_FILE: &str = ".lock";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive advisory lock on a vault, held for the duration of a write.
///
/// Every `tn` command that opens the engine takes it, and `tn watch` holds it
/// while building its index. The lock file itself is never removed: unlinking
/// it would let a waiter lock an orphaned inode.
pub struct VaultLock {
    _file: File,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("vault is locked by {}", holder_text(.holder))]
    Timeout { path: PathBuf, holder: Option<u32> },
}

fn holder_text(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!("another tn process (pid {})", pid),
        None => "another tn process".to_string(),
    }
}

impl VaultLock {
    /// Lock `<root>/.lock`, polling until `timeout` runs out.
    pub fn acquire(root: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = root.join(LOCK_FILE);
        let open_err = |source| LockError::Open {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(open_err)?;

        let deadline = Instant::now() + timeout;
        while try_lock(&file).is_err() {
            if Instant::now() >= deadline {
                let holder = read_holder(&mut file);
                return Err(LockError::Timeout { path, holder });
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // record ourselves for whoever waits next
        let _ = write_holder(&mut file);
        tracing::debug!(path = %path.display(), "vault lock acquired");
        Ok(VaultLock { _file: file })
    }

    pub fn acquire_default(root: &Path) -> Result<Self, LockError> {
        Self::acquire(root, Duration::from_secs(5))
    }
}

fn read_holder(file: &mut File) -> Option<u32> {
    let mut text = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut text).ok()?;
    text.trim().parse().ok()
}

fn write_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())
}

#[cfg(unix)]
fn try_lock(file: &File) -> Result<(), std::io::Error> {
    use std::os::unix::io::AsRawFd;
    // released by the kernel when the descriptor closes
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let tmp = TempDir::new().unwrap();
        let lock = VaultLock::acquire_default(tmp.path()).unwrap();
        let pid = std::fs::read_to_string(tmp.path().join(LOCK_FILE)).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
        drop(lock);
        assert!(VaultLock::acquire_default(tmp.path()).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn contended_lock_names_the_holder() {
        let tmp = TempDir::new().unwrap();
        let _held = VaultLock::acquire_default(tmp.path()).unwrap();
        let second = VaultLock::acquire(tmp.path(), Duration::from_millis(50));
        match second {
            Err(LockError::Timeout { holder, .. }) => assert_eq!(holder, Some(std::process::id())),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("lock acquired twice"),
        }
    }
}
