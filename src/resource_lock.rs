//! Host-wide exclusive access to a shared resource (typically one GPU).
//!
//! The lock is an advisory `flock` on a well-known file in the system temp
//! directory, so it serializes evaluators across threads, processes and
//! independent search runs on the same machine. Locks are per open file, so
//! two handles in one process exclude each other as well. There is no
//! reentrancy: acquiring twice from the same thread deadlocks.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{debug, warn};

use crate::evolution::{BoxError, SandboxEvaluator};
use crate::schema::Verdict;

/// File name of the default lock under the system temp directory.
pub const DEFAULT_LOCK_FILE_NAME: &str = "evosearch_cross_process.lock";

/// A named host-wide lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLock {
    path: PathBuf,
}

impl Default for ResourceLock {
    fn default() -> Self {
        Self::host_default()
    }
}

impl ResourceLock {
    /// The lock shared by every evaluator on this host.
    pub fn host_default() -> Self {
        Self::new(std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME))
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }

    /// Block until the lock is held. No timeout.
    pub fn acquire(&self) -> io::Result<ResourceGuard> {
        let file = self.open()?;
        file.lock_exclusive()?;
        debug!("Acquired resource lock {}", self.path.display());
        Ok(ResourceGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Take the lock if it is free. `Ok(None)` when another holder has it.
    pub fn try_acquire(&self) -> io::Result<Option<ResourceGuard>> {
        let file = self.open()?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(ResourceGuard {
                file,
                path: self.path.clone(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run `f` while holding the lock.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> io::Result<T> {
        let _guard = self.acquire()?;
        Ok(f())
    }
}

/// Held lock. Released on drop, including during unwinding.
#[derive(Debug)]
pub struct ResourceGuard {
    file: File,
    path: PathBuf,
}

impl ResourceGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release resource lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released resource lock {}", self.path.display());
        }
    }
}

/// Evaluator decorator that holds a [`ResourceLock`] for every call.
pub struct ExclusiveEvaluator<E> {
    inner: E,
    lock: ResourceLock,
}

impl<E: SandboxEvaluator> ExclusiveEvaluator<E> {
    /// Guard `inner` with the host default lock.
    pub fn new(inner: E) -> Self {
        Self::with_lock(inner, ResourceLock::host_default())
    }

    pub fn with_lock(inner: E, lock: ResourceLock) -> Self {
        Self { inner, lock }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn lock(&self) -> &ResourceLock {
        &self.lock
    }
}

impl<E: SandboxEvaluator> SandboxEvaluator for ExclusiveEvaluator<E> {
    fn evaluate(&self, text: &str) -> Result<Verdict, BoxError> {
        let _guard = self.lock.acquire()?;
        self.inner.evaluate(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Tracks how many callers are inside the critical section at once.
    #[derive(Default)]
    struct Occupancy {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Occupancy {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_default_path() {
        let lock = ResourceLock::host_default();
        assert_eq!(lock.path(), std::env::temp_dir().join(DEFAULT_LOCK_FILE_NAME));
    }

    #[test]
    fn test_mutual_exclusion_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gpu.lock");
        let occupancy = Arc::new(Occupancy::default());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = ResourceLock::new(&path);
                let occupancy = Arc::clone(&occupancy);
                thread::spawn(move || {
                    for _ in 0..3 {
                        lock.with_lock(|| {
                            occupancy.enter();
                            thread::sleep(Duration::from_millis(5));
                            occupancy.leave();
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_acquire_while_held() {
        let dir = tempdir().unwrap();
        let lock = ResourceLock::new(dir.path().join("gpu.lock"));

        let guard = lock.acquire().unwrap();
        assert!(lock.try_acquire().unwrap().is_none());
        drop(guard);
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let dir = tempdir().unwrap();
        let lock = ResourceLock::new(dir.path().join("gpu.lock"));

        let result = panic::catch_unwind(|| {
            let _guard = lock.acquire().unwrap();
            panic!("evaluator crashed");
        });
        assert!(result.is_err());
        assert!(lock.try_acquire().unwrap().is_some());
    }

    struct SlowEvaluator(Arc<Occupancy>);

    impl SandboxEvaluator for SlowEvaluator {
        fn evaluate(&self, _text: &str) -> Result<Verdict, BoxError> {
            self.0.enter();
            thread::sleep(Duration::from_millis(5));
            self.0.leave();
            Ok(Verdict::from_cost(1.0))
        }
    }

    #[test]
    fn test_exclusive_evaluator_serializes_calls() {
        let dir = tempdir().unwrap();
        let occupancy = Arc::new(Occupancy::default());
        let evaluator = Arc::new(ExclusiveEvaluator::with_lock(
            SlowEvaluator(Arc::clone(&occupancy)),
            ResourceLock::new(dir.path().join("gpu.lock")),
        ));

        thread::scope(|s| {
            for _ in 0..4 {
                let evaluator = Arc::clone(&evaluator);
                s.spawn(move || {
                    let verdict = evaluator.evaluate("kernel").unwrap();
                    assert_eq!(verdict.score, Some(-1.0));
                });
            }
        });

        assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
    }
}
