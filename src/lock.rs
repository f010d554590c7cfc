//! File locking and atomic writes for the task and audit collections.
//!
//! Every store operation is a whole-file read-modify-write; the lock file
//! next to the data file serializes those round trips across processes,
//! and the temp-file + rename write keeps readers from ever seeing a
//! partially written collection.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Retry interval when waiting for a contended lock
const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // Windows surfaces lock/sharing violations as raw os errors 32/33.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// An exclusive file lock released on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock, creating the lock file if needed.
    ///
    /// Returns `Error::LockFailed` if the lock cannot be acquired within
    /// the timeout.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Try to acquire the lock without waiting.
    ///
    /// Returns `Ok(None)` when the lock is held elsewhere.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Path to the locked file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Conventional lock-file path for a data file (`<path>.lock`).
pub fn lock_path_for(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.lock", path.display()))
}

/// Atomically replace a file's contents.
///
/// Writes to a temp file in the same directory, fsyncs, then renames over
/// the target so the file is either fully written or untouched.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("tasks.json.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        assert!(lock_path.exists());
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_none());

        drop(lock);
        assert!(FileLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn lock_timeout_returns_lock_failed() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("busy.lock");

        let _held = FileLock::acquire(&lock_path, 1000).unwrap();
        let result = FileLock::acquire(&lock_path, 50);
        assert!(matches!(result, Err(Error::LockFailed(_))));
    }

    #[test]
    fn atomic_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("tasks.json");

        write_atomic(&file_path, b"[]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[]");

        write_atomic(&file_path, b"[{\"id\":1}]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[{\"id\":1}]");
    }

    #[test]
    fn lock_admits_one_holder_at_a_time() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("stress.lock");

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let in_lock = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(threads);
        for _ in 0..threads {
            let barrier = Arc::clone(&barrier);
            let in_lock = Arc::clone(&in_lock);
            let max_concurrent = Arc::clone(&max_concurrent);
            let lock_path = lock_path.clone();

            handles.push(thread::spawn(move || {
                barrier.wait();
                let _lock = FileLock::acquire(&lock_path, 2000).unwrap();

                let current = in_lock.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = max_concurrent.fetch_max(current, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                in_lock.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
