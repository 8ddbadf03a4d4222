//! Running a backup or restore on its own thread.
//!
//! The caller keeps a [`JobHandle`]: it drains progress events while the job
//! runs, may cancel it, and joins it for the result.

use crate::backup::{BackupManager, BackupRequest};
use crate::concurrency::CancelFlag;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::restore::{RestoreManager, RestoreOutcome, RestoreRequest};
use crate::CoreError;
use dockvault_schema::BackupRecord;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct JobHandle<T> {
    handle: JoinHandle<Result<T, CoreError>>,
    progress: Receiver<ProgressEvent>,
    cancel: CancelFlag,
}

impl<T> JobHandle<T> {
    pub fn progress(&self) -> &Receiver<ProgressEvent> {
        &self.progress
    }

    /// Ask the job to stop at its next step boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<T, CoreError> {
        self.handle
            .join()
            .map_err(|panic| CoreError::Worker(panic_message(panic.as_ref())))?
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_owned()
    }
}

fn spawn<T, F>(name: String, job: F) -> Result<JobHandle<T>, CoreError>
where
    T: Send + 'static,
    F: FnOnce(&ProgressSink, &CancelFlag) -> Result<T, CoreError> + Send + 'static,
{
    let (sink, progress) = ProgressSink::channel();
    let cancel = CancelFlag::new();
    let job_cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || job(&sink, &job_cancel))?;
    Ok(JobHandle {
        handle,
        progress,
        cancel,
    })
}

pub fn spawn_backup(
    manager: Arc<BackupManager>,
    request: BackupRequest,
) -> Result<JobHandle<BackupRecord>, CoreError> {
    let name = format!("backup-{}", request.container);
    spawn(name, move |progress, cancel| {
        manager.create_backup_with(&request, progress, cancel)
    })
}

pub fn spawn_restore(
    manager: Arc<RestoreManager>,
    request: RestoreRequest,
) -> Result<JobHandle<RestoreOutcome>, CoreError> {
    let name = format!("restore-{}", request.backup_id);
    spawn(name, move |progress, cancel| {
        manager.restore_container_with(&request, progress, cancel)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_result_and_progress_are_delivered() {
        let handle = spawn("t".to_owned(), |progress, _cancel| {
            progress.percent(50);
            progress.percent(100);
            Ok(7)
        })
        .unwrap();
        let events: Vec<_> = handle.progress().iter().collect();
        assert_eq!(
            events,
            vec![ProgressEvent::Percent(50), ProgressEvent::Percent(100)]
        );
        assert_eq!(handle.join().unwrap(), 7);
    }

    #[test]
    fn cancel_reaches_the_job() {
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let handle = spawn("t".to_owned(), move |_progress, cancel| {
            go_rx.recv().ok();
            cancel.check()?;
            Ok(())
        })
        .unwrap();
        handle.cancel();
        go_tx.send(()).unwrap();
        assert!(matches!(handle.join(), Err(CoreError::Cancelled)));
    }

    #[test]
    fn panic_becomes_worker_error() {
        let handle = spawn::<(), _>("t".to_owned(), |_p, _c| panic!("boom")).unwrap();
        match handle.join() {
            Err(CoreError::Worker(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
