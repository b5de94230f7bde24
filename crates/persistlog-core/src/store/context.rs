//! The three context stages of a store.
//!
//! ```text
//! ConcurrentContext (stage 1, any thread, own lock)
//!         │ commit: pending changes drained
//!         ▼
//! MainContext       (stage 2, main queue, materialized view)
//!         │ batch handed off
//!         ▼
//! WritingContext    (stage 3, io queue) ──► Coordinator (redb)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use super::Shared;
use crate::entry::{EntryId, LogEntry, StoredEntry};
use crate::error::StoreResult;
use crate::query::FetchRequest;

/// Capacity of the change broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One unsaved mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    Insert(StoredEntry),
    Delete(EntryId),
}

/// Notification sent to observers after the main view changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A batch was applied to the main view
    Committed {
        /// Ids that became visible
        inserted: Vec<EntryId>,
        /// Ids that were removed
        deleted: Vec<EntryId>,
    },
    /// The store was destroyed and the view emptied
    Reset,
}

impl StoreChange {
    /// True if the notification carries no changes.
    pub fn is_empty(&self) -> bool {
        match self {
            StoreChange::Committed { inserted, deleted } => inserted.is_empty() && deleted.is_empty(),
            StoreChange::Reset => false,
        }
    }
}

fn apply_to(view: &mut BTreeMap<EntryId, LogEntry>, changes: &[Change]) -> StoreChange {
    let mut inserted = Vec::new();
    let mut deleted = Vec::new();
    for change in changes {
        match change {
            Change::Insert(stored) => {
                view.insert(stored.id, stored.entry.clone());
                inserted.push(stored.id);
            }
            Change::Delete(id) => {
                if view.remove(id).is_some() {
                    deleted.push(*id);
                }
            }
        }
    }
    StoreChange::Committed { inserted, deleted }
}

// ═══════════════════════════════════════════════════════════════════════════
// Main context
// ═══════════════════════════════════════════════════════════════════════════

struct MainInner {
    view: RwLock<BTreeMap<EntryId, LogEntry>>,
    pending: Mutex<Vec<Change>>,
    next_id: AtomicU64,
    events: broadcast::Sender<StoreChange>,
}

/// Foreground context holding the materialized view of every entry.
///
/// Reads may happen from any thread. Mutations made directly on the main
/// context ([`insert`](Self::insert), [`delete`](Self::delete)) should run on
/// the main queue (see [`Store::perform_on_main`](super::Store::perform_on_main))
/// and are saved with [`Store::commit_main`](super::Store::commit_main).
#[derive(Clone)]
pub struct MainContext {
    inner: Arc<MainInner>,
}

impl MainContext {
    pub(crate) fn new(entries: Vec<StoredEntry>, next_id: u64) -> Self {
        let view = entries.into_iter().map(|s| (s.id, s.entry)).collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MainInner {
                view: RwLock::new(view),
                pending: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(next_id),
                events,
            }),
        }
    }

    /// Rows of the view matching `request`.
    pub fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<StoredEntry>> {
        request.execute(self.snapshot())
    }

    /// Page `page` (zero-based) of `request.batch_size` rows.
    pub fn fetch_page(&self, request: &FetchRequest, page: usize) -> StoreResult<Vec<StoredEntry>> {
        let rows = self.fetch(request)?;
        Ok(rows
            .into_iter()
            .skip(page.saturating_mul(request.batch_size))
            .take(request.batch_size)
            .collect())
    }

    /// Number of rows `fetch` would return.
    pub fn count(&self, request: &FetchRequest) -> StoreResult<usize> {
        request.validate()?;
        let view = self.inner.view.read();
        let matching = view
            .values()
            .filter(|entry| request.predicate.matches(entry))
            .count()
            .saturating_sub(request.offset);
        Ok(match request.limit {
            Some(limit) => matching.min(limit),
            None => matching,
        })
    }

    /// Look up one entry.
    pub fn get(&self, id: EntryId) -> Option<StoredEntry> {
        self.inner.view.read().get(&id).map(|entry| StoredEntry {
            id,
            entry: entry.clone(),
        })
    }

    /// Number of entries in the view.
    pub fn len(&self) -> usize {
        self.inner.view.read().len()
    }

    /// True when the view holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.view.read().is_empty()
    }

    /// Insert directly into the view. Saved by the next `commit_main`.
    pub fn insert(&self, entry: LogEntry) -> EntryId {
        let stored = StoredEntry {
            id: self.allocate_id(),
            entry,
        };
        let id = stored.id;
        let change = Change::Insert(stored);
        apply_to(&mut self.inner.view.write(), std::slice::from_ref(&change));
        self.inner.pending.lock().push(change);
        id
    }

    /// Remove an entry from the view. Saved by the next `commit_main`.
    ///
    /// Returns false if the entry was not present.
    pub fn delete(&self, id: EntryId) -> bool {
        let removed = self.inner.view.write().remove(&id).is_some();
        if removed {
            self.inner.pending.lock().push(Change::Delete(id));
        }
        removed
    }

    /// True if direct mutations are waiting for `commit_main`.
    pub fn has_changes(&self) -> bool {
        !self.inner.pending.lock().is_empty()
    }

    /// Receive a [`StoreChange`] after every commit that reaches the view.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.events.subscribe()
    }

    pub(crate) fn allocate_id(&self) -> EntryId {
        EntryId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn snapshot(&self) -> Vec<StoredEntry> {
        self.inner
            .view
            .read()
            .iter()
            .map(|(id, entry)| StoredEntry {
                id: *id,
                entry: entry.clone(),
            })
            .collect()
    }

    pub(crate) fn apply(&self, changes: &[Change]) -> StoreChange {
        apply_to(&mut self.inner.view.write(), changes)
    }

    pub(crate) fn take_pending(&self) -> Vec<Change> {
        std::mem::take(&mut *self.inner.pending.lock())
    }

    pub(crate) fn publish(&self, change: StoreChange) {
        if change.is_empty() {
            return;
        }
        // No receivers is fine
        let _ = self.inner.events.send(change);
    }

    pub(crate) fn reset(&self) {
        self.inner.view.write().clear();
        self.inner.pending.lock().clear();
        self.publish(StoreChange::Reset);
    }
}

impl std::fmt::Debug for MainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainContext")
            .field("entries", &self.len())
            .field("has_changes", &self.has_changes())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Writing context
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct WritingInner {
    pending: Mutex<Vec<Change>>,
    written: AtomicU64,
}

/// Background context that owns the path to disk.
///
/// Batches are absorbed and written on the io queue only.
#[derive(Clone, Default)]
pub struct WritingContext {
    inner: Arc<WritingInner>,
}

impl WritingContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Changes absorbed but not yet written.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// True if changes are waiting to be written.
    pub fn has_changes(&self) -> bool {
        self.pending_len() > 0
    }

    /// Changes written to disk since the store was opened.
    pub fn written(&self) -> u64 {
        self.inner.written.load(Ordering::SeqCst)
    }

    pub(crate) fn absorb(&self, changes: Vec<Change>) {
        self.inner.pending.lock().extend(changes);
    }

    pub(crate) fn take_pending(&self) -> Vec<Change> {
        std::mem::take(&mut *self.inner.pending.lock())
    }

    pub(crate) fn record_written(&self, count: usize) {
        self.inner.written.fetch_add(count as u64, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.inner.pending.lock().clear();
    }
}

impl std::fmt::Debug for WritingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritingContext")
            .field("pending", &self.pending_len())
            .field("written", &self.written())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Concurrent context
// ═══════════════════════════════════════════════════════════════════════════

/// Short-lived scratch context for work off the main queue.
///
/// Changes stay private to the context until
/// [`Store::commit`](super::Store::commit) pushes them down the chain.
pub struct ConcurrentContext {
    pub(super) store: Arc<Shared>,
    pending: Mutex<Vec<Change>>,
}

impl ConcurrentContext {
    pub(crate) fn new(store: Arc<Shared>) -> Self {
        Self {
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Stage a new entry and return the id it will be stored under.
    pub fn insert(&self, entry: LogEntry) -> EntryId {
        let id = self.store.main.allocate_id();
        self.pending
            .lock()
            .push(Change::Insert(StoredEntry { id, entry }));
        id
    }

    /// Stage the removal of an entry.
    pub fn delete(&self, id: EntryId) {
        self.pending.lock().push(Change::Delete(id));
    }

    /// Rows matching `request`: the main view overlaid with this context's
    /// staged changes.
    pub fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<StoredEntry>> {
        request.validate()?;
        let mut view: BTreeMap<EntryId, LogEntry> = self
            .store
            .main
            .snapshot()
            .into_iter()
            .map(|s| (s.id, s.entry))
            .collect();
        apply_to(&mut view, &self.pending.lock());
        request.execute(view.into_iter().map(|(id, entry)| StoredEntry { id, entry }))
    }

    /// True when there are staged changes.
    pub fn has_changes(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Number of staged changes.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Discard staged changes.
    pub fn rollback(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        debug!(changes = dropped.len(), "Rolled back concurrent context");
    }

    pub(crate) fn take_pending(&self) -> Vec<Change> {
        std::mem::take(&mut *self.pending.lock())
    }
}

impl std::fmt::Debug for ConcurrentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentContext")
            .field("pending", &self.pending_len())
            .finish()
    }
}
