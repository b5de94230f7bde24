//! Write-behind log store.
//!
//! A [`Store`] owns one backing redb file and the three contexts layered on
//! top of it. Writes made in a [`ConcurrentContext`] travel down a commit
//! chain:
//!
//! 1. the context's staged changes are drained on the caller's thread,
//! 2. the main queue applies them to the [`MainContext`] view and notifies
//!    observers,
//! 3. the io queue hands them to the [`WritingContext`], which writes the
//!    batch in one redb transaction.
//!
//! The completion of a commit always runs on the main queue, exactly once.
//!
//! # Example
//!
//! ```no_run
//! use persistlog_core::{LogEntry, LogLevel, SiteInfo, Store, FetchRequest};
//!
//! # fn main() -> Result<(), persistlog_core::StoreError> {
//! let store = Store::open("/tmp/logs", "LogModel", false)?;
//! let context = store.new_concurrent_context();
//! context.insert(LogEntry::new(LogLevel::Info, "hello", SiteInfo::new("main.rs", "main", 1)));
//! store.commit(&context, None);
//! store.flush()?;
//!
//! let rows = store.main().fetch(&FetchRequest::new())?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

mod context;
mod coordinator;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub(crate) use context::Change;
pub use context::{ConcurrentContext, MainContext, StoreChange, WritingContext};

use self::coordinator::Coordinator;
use crate::entry::StoredEntry;
use crate::error::{StoreError, StoreResult};
use crate::live::LiveQuery;
use crate::model::{ModelBundle, ModelDefinition};
use crate::query::FetchRequest;
use crate::queue::SerialQueue;

/// Callback invoked once a commit has finished, on the main queue.
pub type Completion = Box<dyn FnOnce(StoreResult<()>) + Send + 'static>;

/// State shared by a store handle, its contexts and queued jobs.
pub(crate) struct Shared {
    model: ModelDefinition,
    location: PathBuf,
    main: MainContext,
    writing: WritingContext,
    main_queue: SerialQueue,
    io_queue: SerialQueue,
    coordinator: Mutex<Option<Coordinator>>,
    destroyed: AtomicBool,
}

impl Shared {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Deliver `result` to `completion` on the main queue.
    fn complete(self: &Arc<Self>, completion: Option<Completion>, result: StoreResult<()>) {
        if let Err(e) = &result {
            debug!(error = %e, "Commit finished with error");
        }
        let Some(completion) = completion else {
            if let Err(e) = result {
                warn!(error = %e, "Commit failed with no completion attached");
            }
            return;
        };

        if self.main_queue.is_current() {
            completion(result);
        } else if let Err(e) = self.main_queue.dispatch(move || completion(result)) {
            error!(error = %e, "Unable to deliver commit completion");
        }
    }

    /// Stage 2: apply a batch to the main view, then hand it to writing.
    fn save_main(self: &Arc<Self>, changes: Vec<Change>, completion: Option<Completion>) {
        if self.is_destroyed() {
            self.complete(completion, Err(StoreError::DeletedStore));
            return;
        }

        let notification = self.main.apply(&changes);
        self.main.publish(notification);

        // Direct main mutations ride along with the incoming batch
        let mut batch = self.main.take_pending();
        batch.extend(changes);

        if batch.is_empty() {
            self.complete(completion, Ok(()));
            return;
        }

        let shared = Arc::clone(self);
        let dispatched = self
            .io_queue
            .dispatch(move || shared.save_writing(batch, completion));
        if let Err(e) = dispatched {
            error!(error = %e, "Unable to hand batch to the io queue");
        }
    }

    /// Stage 3: absorb into the writing context and write to disk.
    fn save_writing(self: &Arc<Self>, changes: Vec<Change>, completion: Option<Completion>) {
        self.writing.absorb(changes);

        let result = {
            let coordinator = self.coordinator.lock();
            match coordinator.as_ref() {
                None => {
                    self.writing.reset();
                    Err(StoreError::DeletedStore)
                }
                Some(coordinator) => {
                    let batch = self.writing.take_pending();
                    let written = batch.len();
                    coordinator.write_changes(&batch).map(|()| {
                        self.writing.record_written(written);
                    })
                }
            }
        };

        if let Err(e) = &result {
            if !e.is_deleted_store() {
                error!(error = %e, "Writing batch to disk failed");
            }
        }
        self.complete(completion, result);
    }
}

/// Handle to an open log store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open the store for `model_name` from the built-in model bundle.
    ///
    /// The backing file is `<location>/<model_name>.redb`; `location` is
    /// created if it does not exist. With `in_memory` set nothing is written
    /// to the filesystem.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidModelPath` if the model is unknown and
    /// `StoreError::StoreOpenFailure` if the file cannot be opened, migrated
    /// or loaded; in that case the store files have been removed, unless the
    /// file is held open by another handle.
    pub fn open(location: impl AsRef<Path>, model_name: &str, in_memory: bool) -> StoreResult<Self> {
        Self::open_with_bundle(&ModelBundle::builtin(), location, model_name, in_memory)
    }

    /// Open a store against an explicit model bundle.
    pub fn open_with_bundle(
        bundle: &ModelBundle,
        location: impl AsRef<Path>,
        model_name: &str,
        in_memory: bool,
    ) -> StoreResult<Self> {
        let location = location.as_ref().to_path_buf();
        let model = bundle.locate(model_name)?.clone();

        let coordinator = Coordinator::open(&location, &model, in_memory)?;
        let (entries, next_id) = match coordinator.initial_state() {
            Ok(state) => state,
            Err(e) => return Err(coordinator.abandon(e)),
        };
        info!(
            model = %model.name,
            entries = entries.len(),
            in_memory,
            "Loaded log store"
        );

        let shared = Shared {
            main: MainContext::new(entries, next_id),
            writing: WritingContext::new(),
            main_queue: SerialQueue::spawn("main")?,
            io_queue: SerialQueue::spawn("io")?,
            coordinator: Mutex::new(Some(coordinator)),
            destroyed: AtomicBool::new(false),
            model,
            location,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// The model this store was opened with.
    pub fn model(&self) -> &ModelDefinition {
        &self.shared.model
    }

    /// Directory the store lives in.
    pub fn location(&self) -> &Path {
        &self.shared.location
    }

    /// Primary file path; `None` for in-memory or destroyed stores.
    pub fn path(&self) -> Option<PathBuf> {
        self.shared.coordinator.lock().as_ref().and_then(|c| c.path())
    }

    /// Schema version recorded on disk; `None` once destroyed.
    pub fn schema_version(&self) -> StoreResult<Option<u64>> {
        match self.shared.coordinator.lock().as_ref() {
            Some(coordinator) => coordinator.schema_version(),
            None => Ok(None),
        }
    }

    /// True once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// The foreground context. Valid for the life of the store.
    pub fn main(&self) -> &MainContext {
        &self.shared.main
    }

    /// The disk-facing context. Valid for the life of the store.
    pub fn writing(&self) -> &WritingContext {
        &self.shared.writing
    }

    /// A fresh scratch context whose changes reach disk via [`commit`](Self::commit).
    pub fn new_concurrent_context(&self) -> ConcurrentContext {
        ConcurrentContext::new(Arc::clone(&self.shared))
    }

    /// Push a context's staged changes through main and writing to disk.
    ///
    /// Never blocks on disk. `completion`, if given, runs on the main queue
    /// with the outcome; without one, failures are only logged.
    pub fn commit(&self, context: &ConcurrentContext, completion: Option<Completion>) {
        if !Arc::ptr_eq(&context.store, &self.shared) {
            self.shared.complete(completion, Err(StoreError::ForeignContext));
            return;
        }
        if self.shared.is_destroyed() {
            self.shared.complete(completion, Err(StoreError::DeletedStore));
            return;
        }

        let changes = context.take_pending();
        debug!(changes = changes.len(), "Committing concurrent context");

        if self.shared.main_queue.is_current() {
            self.shared.save_main(changes, completion);
            return;
        }
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self
            .shared
            .main_queue
            .dispatch(move || shared.save_main(changes, completion))
        {
            error!(error = %e, "Unable to dispatch commit to the main queue");
        }
    }

    /// Commit and wait for the outcome.
    pub async fn commit_async(&self, context: &ConcurrentContext) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.commit(
            context,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        rx.await.map_err(|_| StoreError::QueueClosed("main"))?
    }

    /// Save changes made directly on the main context.
    pub fn commit_main(&self, completion: Option<Completion>) {
        if self.shared.main_queue.is_current() {
            self.shared.save_main(Vec::new(), completion);
            return;
        }
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self
            .shared
            .main_queue
            .dispatch(move || shared.save_main(Vec::new(), completion))
        {
            error!(error = %e, "Unable to dispatch main save");
        }
    }

    /// Run `job` on the main queue.
    pub fn perform_on_main(&self, job: impl FnOnce() + Send + 'static) -> StoreResult<()> {
        self.shared.main_queue.dispatch(job)
    }

    /// True when called from the main queue.
    pub fn is_main_queue(&self) -> bool {
        self.shared.main_queue.is_current()
    }

    /// Block until every commit and completion dispatched before this call
    /// has run.
    ///
    /// # Errors
    ///
    /// `StoreError::ReentrantWait` when called from the main or io queue.
    pub fn flush(&self) -> StoreResult<()> {
        for queue in [&self.shared.main_queue, &self.shared.io_queue] {
            if queue.is_current() {
                return Err(StoreError::ReentrantWait(queue.label()));
            }
        }

        let (tx, rx) = std_mpsc::channel();
        self.barrier(move || {
            let _ = tx.send(());
        })?;
        rx.recv().map_err(|_| StoreError::QueueClosed("main"))
    }

    /// Async form of [`flush`](Self::flush).
    pub async fn flush_async(&self) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.barrier(move || {
            let _ = tx.send(());
        })?;
        rx.await.map_err(|_| StoreError::QueueClosed("main"))
    }

    /// main -> io -> main, then `signal`.
    ///
    /// The jobs hold queue handles only, so once `signal` runs no queued
    /// work keeps the store alive.
    fn barrier(&self, signal: impl FnOnce() + Send + 'static) -> StoreResult<()> {
        let io = self.shared.io_queue.clone();
        let main = self.shared.main_queue.clone();
        self.shared.main_queue.dispatch(move || {
            let result = io.dispatch(move || {
                if let Err(e) = main.dispatch(signal) {
                    error!(error = %e, "Flush barrier lost on the main queue");
                }
            });
            if let Err(e) = result {
                error!(error = %e, "Flush barrier lost on the io queue");
            }
        })
    }

    /// Remove the backing store from disk.
    ///
    /// Waits for an in-flight disk write, closes the database, removes the
    /// store files and empties the main and writing contexts. Later commits
    /// fail with `StoreError::DeletedStore`. Calling it again is a no-op.
    pub fn destroy(&self) -> StoreResult<()> {
        let coordinator = {
            let mut slot = self.shared.coordinator.lock();
            let taken = slot.take();
            if taken.is_some() {
                self.shared.destroyed.store(true, Ordering::SeqCst);
            }
            taken
        };
        let Some(coordinator) = coordinator else {
            debug!("Store already destroyed");
            return Ok(());
        };

        let path = coordinator.path();
        let result = coordinator.destroy();

        self.shared.writing.reset();
        self.reset_main();

        match &result {
            Ok(()) => info!(path = ?path, "Destroyed log store"),
            Err(e) => warn!(path = ?path, error = %e, "Destroyed log store with errors"),
        }
        result
    }

    /// Empty the main view on the main queue, so no batch already past the
    /// destroyed check can land after the reset.
    fn reset_main(&self) {
        if self.shared.main_queue.is_current() {
            self.shared.main.reset();
            return;
        }
        let (tx, rx) = std_mpsc::channel();
        let main = self.shared.main.clone();
        let dispatched = self.shared.main_queue.dispatch(move || {
            main.reset();
            let _ = tx.send(());
        });
        if dispatched.is_err() || rx.recv().is_err() {
            warn!("Main queue unavailable; resetting main view in place");
            self.shared.main.reset();
        }
    }

    /// Live, auto-updating view of the rows matching `request`.
    pub fn observe(&self, request: FetchRequest) -> StoreResult<LiveQuery> {
        LiveQuery::new(self.shared.main.clone(), request)
    }

    /// Read matching rows straight from disk on the calling thread.
    pub fn fetch_durable(&self, request: &FetchRequest) -> StoreResult<Vec<StoredEntry>> {
        request.validate()?;
        let rows = {
            let coordinator = self.shared.coordinator.lock();
            let coordinator = coordinator.as_ref().ok_or(StoreError::DeletedStore)?;
            coordinator
                .load_entries()
                .map_err(|e| StoreError::FetchFailure(e.to_string()))?
        };
        request.execute(rows)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("model", &self.shared.model.name)
            .field("location", &self.shared.location)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryId, LogEntry, SiteInfo};
    use crate::level::LogLevel;
    use crate::model::{ModelDefinition, LOG_MODEL_NAME};
    use tempfile::TempDir;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, message, SiteInfo::new("a.rs", "f", 1))
    }

    fn open(temp: &TempDir) -> Store {
        Store::open(temp.path(), LOG_MODEL_NAME, false).unwrap()
    }

    fn commit_and_wait(store: &Store, context: &ConcurrentContext) -> StoreResult<()> {
        let (tx, rx) = std_mpsc::channel();
        store.commit(
            context,
            Some(Box::new(move |result| {
                tx.send(result).unwrap();
            })),
        );
        rx.recv().unwrap()
    }

    #[test]
    fn test_open_unknown_model() {
        let temp = TempDir::new().unwrap();
        let result = Store::open(temp.path(), "Missing", false);
        assert!(matches!(result, Err(StoreError::InvalidModelPath { .. })));
    }

    #[test]
    fn test_commit_reaches_main_and_disk() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        let context = store.new_concurrent_context();
        let id = context.insert(entry("hello"));
        assert!(context.has_changes());
        commit_and_wait(&store, &context).unwrap();

        assert!(!context.has_changes());
        assert_eq!(store.main().get(id).unwrap().message, "hello");
        assert_eq!(store.writing().written(), 1);

        let durable = store.fetch_durable(&FetchRequest::new()).unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].id, id);
    }

    #[test]
    fn test_completion_runs_on_main_queue() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        context.insert(entry("x"));

        let (tx, rx) = std_mpsc::channel();
        let handle = store.clone();
        store.commit(
            &context,
            Some(Box::new(move |_| {
                tx.send(handle.is_main_queue()).unwrap();
            })),
        );
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_foreign_context_is_rejected() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let store_a = open(&a);
        let store_b = open(&b);

        let context = store_b.new_concurrent_context();
        context.insert(entry("x"));
        let result = commit_and_wait(&store_a, &context);
        assert!(matches!(result, Err(StoreError::ForeignContext)));
        assert!(context.has_changes());
    }

    #[test]
    fn test_rollback_discards_changes() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        context.insert(entry("x"));
        context.rollback();
        commit_and_wait(&store, &context).unwrap();
        assert!(store.main().is_empty());
    }

    #[test]
    fn test_context_fetch_sees_own_changes() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        let seed = store.new_concurrent_context();
        let first = seed.insert(entry("first"));
        commit_and_wait(&store, &seed).unwrap();

        let context = store.new_concurrent_context();
        context.insert(entry("second"));
        context.delete(first);

        let rows = context.fetch(&FetchRequest::new()).unwrap();
        let messages: Vec<_> = rows.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["second"]);
        // Main is untouched until commit
        assert_eq!(store.main().len(), 1);
    }

    #[test]
    fn test_commit_main_saves_direct_deletes() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        let id = context.insert(entry("x"));
        commit_and_wait(&store, &context).unwrap();

        let (tx, rx) = std_mpsc::channel();
        let inner = store.clone();
        store
            .perform_on_main(move || {
                inner.main().delete(id);
                inner.commit_main(Some(Box::new(move |result| tx.send(result).unwrap())));
            })
            .unwrap();
        rx.recv().unwrap().unwrap();

        assert!(store.fetch_durable(&FetchRequest::new()).unwrap().is_empty());
    }

    #[test]
    fn test_flush_waits_for_pending_commits() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        for i in 0..50 {
            let context = store.new_concurrent_context();
            context.insert(entry(&format!("m{}", i)));
            store.commit(&context, None);
        }
        store.flush().unwrap();
        assert_eq!(store.main().len(), 50);
        assert_eq!(store.fetch_durable(&FetchRequest::new()).unwrap().len(), 50);
    }

    #[test]
    fn test_flush_from_main_queue_is_reentrant() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let (tx, rx) = std_mpsc::channel();
        let inner = store.clone();
        store
            .perform_on_main(move || tx.send(inner.flush()).unwrap())
            .unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            Err(StoreError::ReentrantWait("main"))
        ));
    }

    #[test]
    fn test_destroy_then_commit_fails() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        context.insert(entry("x"));
        commit_and_wait(&store, &context).unwrap();

        store.destroy().unwrap();
        assert!(store.is_destroyed());
        assert!(!temp.path().join("LogModel.redb").exists());
        assert!(store.main().is_empty());
        assert_eq!(store.writing().pending_len(), 0);

        let context = store.new_concurrent_context();
        context.insert(entry("y"));
        let result = commit_and_wait(&store, &context);
        assert!(matches!(result, Err(StoreError::DeletedStore)));

        // Idempotent
        store.destroy().unwrap();
    }

    #[test]
    fn test_reopen_seeds_ids_after_last_key() {
        let temp = TempDir::new().unwrap();
        let last = {
            let store = open(&temp);
            let context = store.new_concurrent_context();
            context.insert(entry("a"));
            let last = context.insert(entry("b"));
            commit_and_wait(&store, &context).unwrap();
            store.flush().unwrap();
            last
        };

        let store = open(&temp);
        assert_eq!(store.main().len(), 2);
        let context = store.new_concurrent_context();
        let next = context.insert(entry("c"));
        assert_eq!(next, EntryId(last.0 + 1));
    }

    #[test]
    fn test_in_memory_store_leaves_no_files() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path().join("mem"), LOG_MODEL_NAME, true).unwrap();
        let context = store.new_concurrent_context();
        context.insert(entry("x"));
        commit_and_wait(&store, &context).unwrap();

        assert_eq!(store.path(), None);
        assert!(!temp.path().join("mem").exists());
        assert_eq!(store.fetch_durable(&FetchRequest::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_open_with_custom_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = ModelBundle::empty().with_model(ModelDefinition::new("Audit", 1));
        let store = Store::open_with_bundle(&bundle, temp.path(), "Audit", false).unwrap();
        assert_eq!(store.path(), Some(temp.path().join("Audit.redb")));
        assert_eq!(store.schema_version().unwrap(), Some(1));
    }

    #[test]
    fn test_destroy_during_commits_leaves_main_empty() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);

        let writer = store.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..300 {
                let context = writer.new_concurrent_context();
                context.insert(entry(&format!("m{}", i)));
                writer.commit(&context, None);
            }
        });
        while store.main().len() < 10 {
            std::thread::yield_now();
        }
        store.destroy().unwrap();
        handle.join().unwrap();
        store.flush().unwrap();

        assert!(store.main().is_empty());
        assert!(!store.main().has_changes());
    }

    #[test]
    fn test_destroy_from_main_queue() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        context.insert(entry("x"));
        commit_and_wait(&store, &context).unwrap();

        let (tx, rx) = std_mpsc::channel();
        let inner = store.clone();
        store
            .perform_on_main(move || tx.send(inner.destroy()).unwrap())
            .unwrap();
        rx.recv().unwrap().unwrap();

        assert!(store.main().is_empty());
        assert!(!temp.path().join("LogModel.redb").exists());
    }

    #[tokio::test]
    async fn test_commit_async_and_flush_async() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let context = store.new_concurrent_context();
        context.insert(entry("x"));
        store.commit_async(&context).await.unwrap();
        store.flush_async().await.unwrap();
        assert_eq!(store.main().len(), 1);
    }
}
