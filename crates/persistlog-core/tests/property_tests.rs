//! Property-based tests for result diffs and queries
//!
//! Uses proptest to verify that change batches reproduce the new result set
//! and that fetch requests filter and order consistently.

use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};
use persistlog_core::{
    diff, Condition, EntryId, FetchRequest, LogEntry, LogLevel, Predicate, ResultChange,
    SiteInfo, SortDescriptor, Store, StoredEntry, LOG_MODEL_NAME,
};
use proptest::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Strategy Generators
// ============================================================================

fn row(id: u64, message: String) -> StoredEntry {
    StoredEntry {
        id: EntryId(id),
        entry: LogEntry::new(LogLevel::Info, message, SiteInfo::new("a.rs", "f", 1))
            .with_timestamp(Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap()),
    }
}

/// A result set: distinct ids in arbitrary order
fn result_set_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::sample::subsequence((0u64..30).collect::<Vec<_>>(), 0..30).prop_shuffle()
}

fn level_strategy() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
    ]
}

fn filter_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("Apple".to_string())),
        Just(Some("Kiwi".to_string())),
        Just(Some("Network".to_string())),
    ]
}

/// (level, filter, seconds offset)
fn entries_strategy() -> impl Strategy<Value = Vec<(LogLevel, Option<String>, i64)>> {
    prop::collection::vec((level_strategy(), filter_strategy(), 0i64..20), 0..40)
}

// ============================================================================
// Patch application with table-view batch semantics
// ============================================================================

fn apply_patch(old: &[StoredEntry], new: &[StoredEntry], changes: &[ResultChange]) -> Vec<StoredEntry> {
    let by_id: HashMap<EntryId, &StoredEntry> = new.iter().map(|r| (r.id, r)).collect();
    let mut deleted = HashSet::new();
    let mut moved = HashSet::new();
    let mut updated = HashSet::new();
    let mut slots: Vec<Option<StoredEntry>> = vec![None; new.len()];

    for change in changes {
        match *change {
            ResultChange::Delete { index } => {
                deleted.insert(index);
            }
            ResultChange::Insert { index } => slots[index] = Some(new[index].clone()),
            ResultChange::Move { from, to } => {
                assert_eq!(old[from].id, new[to].id, "move must carry the same row");
                moved.insert(from);
                slots[to] = Some(new[to].clone());
            }
            ResultChange::Update { index } => {
                updated.insert(index);
            }
        }
    }

    let mut staying = old
        .iter()
        .enumerate()
        .filter(|(i, _)| !deleted.contains(i) && !moved.contains(i))
        .map(|(i, r)| {
            if updated.contains(&i) {
                (*by_id[&r.id]).clone()
            } else {
                r.clone()
            }
        });

    slots
        .into_iter()
        .map(|slot| slot.or_else(|| staying.next()).expect("slot filled"))
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Applying the diff to the old rows yields the new rows
    #[test]
    fn diff_patch_reproduces_new(
        old_ids in result_set_strategy(),
        new_ids in result_set_strategy(),
        salt in 0u64..4,
    ) {
        let old: Vec<_> = old_ids.iter().map(|&id| row(id, format!("m{}", id))).collect();
        let new: Vec<_> = new_ids
            .iter()
            .map(|&id| {
                let suffix = if id % 4 == salt { "*" } else { "" };
                row(id, format!("m{}{}", id, suffix))
            })
            .collect();

        let changes = diff(&old, &new);
        prop_assert_eq!(apply_patch(&old, &new, &changes), new);
    }

    /// A result set diffed against itself has no changes
    #[test]
    fn diff_of_identical_sets_is_empty(ids in result_set_strategy()) {
        let rows: Vec<_> = ids.iter().map(|&id| row(id, format!("m{}", id))).collect();
        prop_assert!(diff(&rows, &rows).is_empty());
    }

    /// Fetch returns exactly the matching rows, ordered by (timestamp, id)
    #[test]
    fn fetch_filters_and_orders(
        specs in entries_strategy(),
        filter in filter_strategy(),
        level in prop::option::of(level_strategy()),
        ascending in any::<bool>(),
    ) {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path(), LOG_MODEL_NAME, true).unwrap();
        let context = store.new_concurrent_context();
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        for (lvl, tag, offset) in &specs {
            context.insert(
                LogEntry::new(*lvl, "x", SiteInfo::new("a.rs", "f", 1))
                    .with_filter(tag.as_deref())
                    .with_timestamp(base + chrono::Duration::seconds(*offset)),
            );
        }
        let rows = context.fetch(&FetchRequest::new()).unwrap();
        prop_assert_eq!(rows.len(), specs.len());

        let mut predicate = Predicate::all();
        if let Some(tag) = &filter {
            predicate = predicate.and(Condition::FilterEquals(tag.clone()));
        }
        if let Some(level) = level {
            predicate = predicate.and(Condition::LevelAtLeast(level));
        }
        let request = FetchRequest::new()
            .with_predicate(predicate)
            .with_sort(vec![SortDescriptor::timestamp(ascending)]);
        let fetched = context.fetch(&request).unwrap();

        let expected = rows
            .iter()
            .filter(|r| filter.is_none() || r.filter == filter)
            .filter(|r| level.map_or(true, |l| r.level >= l))
            .count();
        prop_assert_eq!(fetched.len(), expected);

        for pair in fetched.windows(2) {
            let key_a = (pair[0].timestamp, pair[0].id);
            let key_b = (pair[1].timestamp, pair[1].id);
            if ascending {
                prop_assert!(key_a < key_b);
            } else {
                prop_assert!(key_a > key_b);
            }
        }
    }
}
