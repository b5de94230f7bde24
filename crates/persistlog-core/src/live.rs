//! Auto-updating result sets over the main view.
//!
//! A [`LiveQuery`] keeps the rows matching a [`FetchRequest`] and, after each
//! commit that reaches the main context, reports how they changed as a list
//! of [`ResultChange`]s with table-view batch semantics:
//!
//! * `Delete.index`, `Update.index` and `Move.from` are positions in the old
//!   result set,
//! * `Insert.index` and `Move.to` are positions in the new result set.

use std::collections::{HashMap, HashSet};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, warn};

use crate::entry::{EntryId, StoredEntry};
use crate::error::{StoreError, StoreResult};
use crate::query::FetchRequest;
use crate::store::{MainContext, StoreChange};

/// One row-level change between two result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResultChange {
    /// Row removed from old position `index`
    Delete { index: usize },
    /// Row added at new position `index`
    Insert { index: usize },
    /// Row moved from old position `from` to new position `to`
    Move { from: usize, to: usize },
    /// Row at old position `index` changed content in place
    Update { index: usize },
}

/// Compute the batch of changes turning `old` into `new`.
///
/// Rows are matched by id. Surviving rows whose relative order is preserved
/// (the longest increasing run of old positions) stay put; the rest are
/// reported as moves.
pub fn diff(old: &[StoredEntry], new: &[StoredEntry]) -> Vec<ResultChange> {
    let old_positions: HashMap<EntryId, usize> =
        old.iter().enumerate().map(|(i, row)| (row.id, i)).collect();
    let new_ids: HashSet<EntryId> = new.iter().map(|row| row.id).collect();

    let mut changes = Vec::new();

    for (index, row) in old.iter().enumerate() {
        if !new_ids.contains(&row.id) {
            changes.push(ResultChange::Delete { index });
        }
    }

    // (old position, new position) of surviving rows, in new order
    let mut survivors = Vec::new();
    for (to, row) in new.iter().enumerate() {
        match old_positions.get(&row.id) {
            Some(&from) => survivors.push((from, to)),
            None => changes.push(ResultChange::Insert { index: to }),
        }
    }

    let sequence: Vec<usize> = survivors.iter().map(|(from, _)| *from).collect();
    let stable = longest_increasing_subsequence(&sequence);

    for (k, &(from, to)) in survivors.iter().enumerate() {
        if !stable.contains(&k) {
            changes.push(ResultChange::Move { from, to });
        } else if old[from].entry != new[to].entry {
            changes.push(ResultChange::Update { index: from });
        }
    }

    changes.sort();
    changes
}

/// Indices into `sequence` forming one longest strictly increasing subsequence.
fn longest_increasing_subsequence(sequence: &[usize]) -> HashSet<usize> {
    // tails[len] = index of the smallest tail of an increasing run of length len + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];

    for (i, value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&t| sequence[t] < *value);
        previous[i] = slot.checked_sub(1).map(|s| tails[s]);
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut result = HashSet::new();
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        result.insert(i);
        cursor = previous[i];
    }
    result
}

/// A result set that follows commits to the main context.
pub struct LiveQuery {
    main: MainContext,
    request: FetchRequest,
    rows: Vec<StoredEntry>,
    events: broadcast::Receiver<StoreChange>,
}

impl LiveQuery {
    pub(crate) fn new(main: MainContext, request: FetchRequest) -> StoreResult<Self> {
        // Subscribe before the initial fetch so no commit falls in between
        let events = main.subscribe();
        let rows = main.fetch(&request)?;
        Ok(Self {
            main,
            request,
            rows,
            events,
        })
    }

    /// Current rows.
    pub fn entries(&self) -> &[StoredEntry] {
        &self.rows
    }

    /// Row at `index`.
    pub fn get(&self, index: usize) -> Option<&StoredEntry> {
        self.rows.get(index)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The request the rows are fetched with.
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// Replace the request and return the changes between the two result sets.
    pub fn set_request(&mut self, request: FetchRequest) -> StoreResult<Vec<ResultChange>> {
        request.validate()?;
        self.request = request;
        self.refresh()
    }

    /// Wait for the next commit that changes the result set.
    pub async fn changed(&mut self) -> StoreResult<Vec<ResultChange>> {
        loop {
            match self.events.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!(missed = n, "Live query lagged, refetching");
                }
                Err(RecvError::Closed) => return Err(StoreError::QueueClosed("main")),
            }
            let changes = self.refresh()?;
            if !changes.is_empty() {
                return Ok(changes);
            }
        }
    }

    /// Apply any commits received so far without waiting.
    ///
    /// Returns an empty list when nothing relevant happened.
    pub fn poll_changes(&mut self) -> StoreResult<Vec<ResultChange>> {
        let mut stale = false;
        loop {
            match self.events.try_recv() {
                Ok(_) => stale = true,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(missed = n, "Live query lagged, refetching");
                    stale = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => return Err(StoreError::QueueClosed("main")),
            }
        }
        if stale {
            self.refresh()
        } else {
            Ok(Vec::new())
        }
    }

    fn refresh(&mut self) -> StoreResult<Vec<ResultChange>> {
        let rows = self.main.fetch(&self.request)?;
        let changes = diff(&self.rows, &rows);
        debug!(rows = rows.len(), changes = changes.len(), "Live query refreshed");
        self.rows = rows;
        Ok(changes)
    }
}

impl std::fmt::Debug for LiveQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("predicate", &self.request.predicate.to_string())
            .field("rows", &self.rows.len())
            .finish()
    }
}
