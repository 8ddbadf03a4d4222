use crate::CoreError;
use dockvault_store::BackupLayout;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Advisory per-container locks under `<backup_root>/.locks/`.
///
/// Holding the guard for a container name means no other dockvault process
/// or thread is backing up or restoring a container of that name.
#[derive(Debug, Clone)]
pub struct OperationLocks {
    layout: BackupLayout,
}

pub struct OperationGuard {
    lock_file: File,
    name: String,
}

impl OperationLocks {
    pub fn new(layout: BackupLayout) -> Self {
        Self { layout }
    }

    fn lock_path(&self, container_name: &str) -> Result<PathBuf, CoreError> {
        if container_name.is_empty()
            || container_name.starts_with('.')
            || container_name.contains(['/', '\\', '\0'])
        {
            return Err(CoreError::InvalidRequest(format!(
                "invalid container name '{container_name}'"
            )));
        }
        Ok(self.layout.lock_file(container_name))
    }

    fn open(&self, container_name: &str) -> Result<File, CoreError> {
        let path = self.lock_path(container_name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?)
    }

    /// Fail fast with [`CoreError::Busy`] when the name is already locked.
    pub fn try_lock(&self, container_name: &str) -> Result<OperationGuard, CoreError> {
        let file = self.open(container_name)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("locked operations on '{container_name}'");
                Ok(OperationGuard {
                    lock_file: file,
                    name: container_name.to_owned(),
                })
            }
            Err(_) => Err(CoreError::Busy(container_name.to_owned())),
        }
    }

    /// Wait until the name is free.
    pub fn lock(&self, container_name: &str) -> Result<OperationGuard, CoreError> {
        let file = self.open(container_name)?;
        file.lock_exclusive()?;
        Ok(OperationGuard {
            lock_file: file,
            name: container_name.to_owned(),
        })
    }
}

impl OperationGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Counting semaphore bounding how many backups and restores run at once.
#[derive(Debug, Clone)]
pub struct JobSlots {
    inner: Arc<(Mutex<usize>, Condvar)>,
    capacity: usize,
}

/// An occupied slot; released on drop.
pub struct JobSlot {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl JobSlots {
    /// `capacity` of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new((Mutex::new(capacity), Condvar::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> JobSlot {
        let (lock, cvar) = &*self.inner;
        let mut free = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while *free == 0 {
            free = cvar.wait(free).unwrap_or_else(PoisonError::into_inner);
        }
        *free -= 1;
        JobSlot {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn try_acquire(&self) -> Option<JobSlot> {
        let mut free = self.inner.0.lock().unwrap_or_else(PoisonError::into_inner);
        if *free == 0 {
            return None;
        }
        *free -= 1;
        Some(JobSlot {
            inner: Arc::clone(&self.inner),
        })
    }
}

impl Default for JobSlots {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.inner;
        let mut free = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *free += 1;
        cvar.notify_one();
    }
}

/// Cooperative cancellation, checked between steps. Also trips when the
/// process-wide shutdown flag is set by the signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) || shutdown_requested()
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ncancel requested, finishing current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn locks() -> (tempfile::TempDir, OperationLocks) {
        let dir = tempfile::tempdir().unwrap();
        let locks = OperationLocks::new(BackupLayout::new(dir.path()));
        (dir, locks)
    }

    #[test]
    fn lock_acquire_and_release() {
        let (dir, locks) = locks();
        {
            let guard = locks.try_lock("web").unwrap();
            assert_eq!(guard.name(), "web");
            assert!(dir.path().join(".locks/web.lock").exists());
        }
        assert!(locks.try_lock("web").is_ok());
    }

    #[test]
    fn second_lock_on_same_name_is_busy() {
        let (_dir, locks) = locks();
        let _held = locks.try_lock("web").unwrap();
        assert!(matches!(locks.try_lock("web"), Err(CoreError::Busy(ref n)) if n == "web"));
    }

    #[test]
    fn different_names_lock_independently() {
        let (_dir, locks) = locks();
        let _a = locks.try_lock("web").unwrap();
        assert!(locks.try_lock("db").is_ok());
    }

    #[test]
    fn path_like_names_rejected() {
        let (_dir, locks) = locks();
        assert!(matches!(
            locks.try_lock("../etc"),
            Err(CoreError::InvalidRequest(_))
        ));
        assert!(matches!(locks.try_lock(""), Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn job_slots_bound_concurrency() {
        let slots = JobSlots::new(2);
        let a = slots.acquire();
        let _b = slots.acquire();
        assert_eq!(slots.available(), 0);
        assert!(slots.try_acquire().is_none());
        drop(a);
        assert_eq!(slots.available(), 1);
        assert!(slots.try_acquire().is_some());
    }

    #[test]
    fn blocked_acquire_wakes_on_release() {
        let slots = JobSlots::new(1);
        let held = slots.acquire();
        let waiter = {
            let slots = slots.clone();
            std::thread::spawn(move || {
                let _slot = slots.acquire();
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
        assert_eq!(slots.available(), 1);
    }

    #[test]
    fn zero_capacity_is_one() {
        assert_eq!(JobSlots::new(0).capacity(), 1);
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(flag.check().is_ok());
        clone.cancel();
        assert!(matches!(flag.check(), Err(CoreError::Cancelled)));
    }
}
