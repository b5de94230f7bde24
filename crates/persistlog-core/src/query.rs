//! Predicates, sort descriptors and fetch requests over log entries.
//!
//! ```text
//! FetchRequest
//! ├── predicate: conjunction of Conditions (empty matches everything)
//! ├── sort: [SortDescriptor]  (ties broken by entry id)
//! ├── batch_size: page size for fetch_page (default 20)
//! └── offset / limit
//! ```

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::entry::{LogEntry, StoredEntry};
use crate::error::{StoreError, StoreResult};
use crate::level::LogLevel;

/// Default number of rows per page.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A single test against an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `filter == value`; entries without a filter never match
    FilterEquals(String),
    /// `level >= value`
    LevelAtLeast(LogLevel),
    /// `timestamp >= value`
    Since(DateTime<Utc>),
    /// `timestamp <= value`
    Until(DateTime<Utc>),
}

impl Condition {
    /// Whether `entry` satisfies this condition.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            Condition::FilterEquals(value) => entry.filter.as_deref() == Some(value.as_str()),
            Condition::LevelAtLeast(level) => entry.level.raw() >= level.raw(),
            Condition::Since(start) => entry.timestamp >= *start,
            Condition::Until(end) => entry.timestamp <= *end,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::FilterEquals(value) => write!(f, "filter == {:?}", value),
            Condition::LevelAtLeast(level) => write!(f, "level >= {}", level.raw()),
            Condition::Since(start) => write!(f, "timestamp >= {}", start.to_rfc3339()),
            Condition::Until(end) => write!(f, "timestamp <= {}", end.to_rfc3339()),
        }
    }
}

/// Conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    conditions: Vec<Condition>,
}

impl Predicate {
    /// The predicate that matches every entry.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add a condition.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// The conditions, in the order they were added.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// True when the predicate has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether every condition holds for `entry`.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.conditions.iter().all(|c| c.matches(entry))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("TRUEPREDICATE");
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", condition)?;
        }
        Ok(())
    }
}

/// Attribute a fetch can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Entry creation time
    Timestamp,
    /// Severity
    Level,
}

/// One ordering key with direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Attribute to order by
    pub key: SortKey,
    /// Ascending when true
    pub ascending: bool,
}

impl SortDescriptor {
    /// Order by timestamp.
    pub fn timestamp(ascending: bool) -> Self {
        Self {
            key: SortKey::Timestamp,
            ascending,
        }
    }

    fn compare(&self, a: &StoredEntry, b: &StoredEntry) -> Ordering {
        let ordering = match self.key {
            SortKey::Timestamp => a.entry.timestamp.cmp(&b.entry.timestamp),
            SortKey::Level => a.entry.level.cmp(&b.entry.level),
        };
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Compare two entries by a list of descriptors.
///
/// Ties fall back to the entry id, in the direction of the first descriptor
/// (ascending when there are none), so results are deterministic and entries
/// written in order by one caller stay in that order.
pub fn compare_entries(sort: &[SortDescriptor], a: &StoredEntry, b: &StoredEntry) -> Ordering {
    for descriptor in sort {
        match descriptor.compare(a, b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    let by_id = a.id.cmp(&b.id);
    match sort.first() {
        Some(first) if !first.ascending => by_id.reverse(),
        _ => by_id,
    }
}

/// A paginated read over log entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Rows must match this predicate
    pub predicate: Predicate,
    /// Ordering of the result
    pub sort: Vec<SortDescriptor>,
    /// Rows per page for [`fetch_page`](crate::store::MainContext::fetch_page)
    pub batch_size: usize,
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return
    pub limit: Option<usize>,
}

impl Default for FetchRequest {
    fn default() -> Self {
        Self {
            predicate: Predicate::all(),
            sort: vec![SortDescriptor::timestamp(true)],
            batch_size: DEFAULT_BATCH_SIZE,
            offset: 0,
            limit: None,
        }
    }
}

impl FetchRequest {
    /// All entries, oldest first, batch size 20.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Replace the sort descriptors.
    pub fn with_sort(mut self, sort: Vec<SortDescriptor>) -> Self {
        self.sort = sort;
        self
    }

    /// Set the page size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of rows to skip.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Set the maximum number of rows.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn validate(&self) -> StoreResult<()> {
        if self.batch_size == 0 {
            return Err(StoreError::FetchFailure(
                "batch size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Filter, sort and window a set of candidate rows.
    pub(crate) fn execute<I>(&self, candidates: I) -> StoreResult<Vec<StoredEntry>>
    where
        I: IntoIterator<Item = StoredEntry>,
    {
        self.validate()?;
        let mut rows: Vec<StoredEntry> = candidates
            .into_iter()
            .filter(|row| self.predicate.matches(&row.entry))
            .collect();
        rows.sort_by(|a, b| compare_entries(&self.sort, a, b));

        let rows = rows.into_iter().skip(self.offset);
        Ok(match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryId, SiteInfo};
    use chrono::TimeZone;

    fn row(id: u64, level: LogLevel, filter: Option<&str>, secs: i64) -> StoredEntry {
        let entry = LogEntry::new(level, format!("m{}", id), SiteInfo::new("a.rs", "f", 1))
            .with_filter(filter)
            .with_timestamp(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
        StoredEntry {
            id: EntryId(id),
            entry,
        }
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        let predicate = Predicate::all();
        assert!(predicate.is_empty());
        assert!(predicate.matches(&row(1, LogLevel::Debug, None, 0).entry));
        assert_eq!(predicate.to_string(), "TRUEPREDICATE");
    }

    #[test]
    fn test_conjunction() {
        let predicate = Predicate::all()
            .and(Condition::FilterEquals("net".into()))
            .and(Condition::LevelAtLeast(LogLevel::Warn));

        assert!(predicate.matches(&row(1, LogLevel::Error, Some("net"), 0).entry));
        assert!(!predicate.matches(&row(2, LogLevel::Info, Some("net"), 0).entry));
        assert!(!predicate.matches(&row(3, LogLevel::Error, Some("other"), 0).entry));
        assert!(!predicate.matches(&row(4, LogLevel::Error, None, 0).entry));
        assert_eq!(predicate.to_string(), "filter == \"net\" AND level >= 2");
    }

    #[test]
    fn test_time_range() {
        let start = Utc.timestamp_opt(1_700_000_010, 0).unwrap();
        let end = Utc.timestamp_opt(1_700_000_020, 0).unwrap();
        let predicate = Predicate::all()
            .and(Condition::Since(start))
            .and(Condition::Until(end));

        assert!(!predicate.matches(&row(1, LogLevel::Info, None, 5).entry));
        assert!(predicate.matches(&row(2, LogLevel::Info, None, 10).entry));
        assert!(predicate.matches(&row(3, LogLevel::Info, None, 20).entry));
        assert!(!predicate.matches(&row(4, LogLevel::Info, None, 21).entry));
    }

    #[test]
    fn test_sort_ties_break_by_id() {
        let rows = vec![
            row(3, LogLevel::Info, None, 0),
            row(1, LogLevel::Info, None, 0),
            row(2, LogLevel::Info, None, 0),
        ];

        let asc = FetchRequest::new().execute(rows.clone()).unwrap();
        let ids: Vec<u64> = asc.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let desc = FetchRequest::new()
            .with_sort(vec![SortDescriptor::timestamp(false)])
            .execute(rows)
            .unwrap();
        let ids: Vec<u64> = desc.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_offset_and_limit() {
        let rows: Vec<_> = (1..=10).map(|i| row(i, LogLevel::Info, None, i as i64)).collect();
        let page = FetchRequest::new().with_offset(2).with_limit(3).execute(rows).unwrap();
        let ids: Vec<u64> = page.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_batch_size_is_a_fetch_failure() {
        let result = FetchRequest::new().with_batch_size(0).execute(Vec::new());
        assert!(matches!(result, Err(StoreError::FetchFailure(_))));
    }
}
