//! Serialized execution domains.
//!
//! A [`SerialQueue`] owns one named worker thread that runs submitted jobs in
//! FIFO order, one at a time. The store uses two of them: `main`, where the
//! in-memory view is mutated and completions are delivered, and `io`, the only
//! place the store writes to disk.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{StoreError, StoreResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO queue of jobs drained by a dedicated thread.
///
/// Clones share the same worker. The worker exits once every handle to the
/// queue is dropped and the remaining jobs have run.
#[derive(Clone)]
pub struct SerialQueue {
    label: &'static str,
    tx: mpsc::UnboundedSender<Job>,
    worker: Arc<OnceLock<ThreadId>>,
}

impl SerialQueue {
    /// Start a queue whose worker thread is named `persistlog-<label>`.
    pub fn spawn(label: &'static str) -> StoreResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = Arc::new(OnceLock::new());
        let worker_id = Arc::clone(&worker);

        thread::Builder::new()
            .name(format!("persistlog-{}", label))
            .spawn(move || {
                let _ = worker_id.set(thread::current().id());
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(queue = label, "Job panicked; queue continues");
                    }
                }
                debug!(queue = label, "Queue drained and closed");
            })?;

        Ok(Self { label, tx, worker })
    }

    /// Queue name.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Submit a job. Fails only if the worker thread is gone.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> StoreResult<()> {
        self.tx
            .send(Box::new(job))
            .map_err(|_| StoreError::QueueClosed(self.label))
    }

    /// True when called from this queue's worker thread.
    pub fn is_current(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue").field("label", &self.label).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn test_jobs_run_in_order() {
        let queue = SerialQueue::spawn("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            queue.dispatch(move || seen.lock().push(i)).unwrap();
        }

        let (done_tx, done_rx) = std_mpsc::channel();
        queue.dispatch(move || done_tx.send(()).unwrap()).unwrap();
        done_rx.recv().unwrap();

        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_is_current_only_on_worker() {
        let queue = Arc::new(SerialQueue::spawn("test-current").unwrap());
        assert!(!queue.is_current());

        let (tx, rx) = std_mpsc::channel();
        let inner = Arc::clone(&queue);
        queue
            .dispatch(move || tx.send(inner.is_current()).unwrap())
            .unwrap();
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_panicking_job_does_not_stop_queue() {
        let queue = SerialQueue::spawn("test-panic").unwrap();
        queue.dispatch(|| panic!("boom")).unwrap();

        let (tx, rx) = std_mpsc::channel();
        queue.dispatch(move || tx.send(7).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
