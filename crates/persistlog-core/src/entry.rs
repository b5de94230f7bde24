//! Log entry types.
//!
//! A [`LogEntry`] is created by the logger facade, inserted into a context
//! and never mutated afterwards. Reads hand back [`StoredEntry`] values that
//! pair the entry with the id the store assigned to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::level::LogLevel;

/// Where a log call was made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiteInfo {
    /// Source file
    pub file: String,
    /// Enclosing function path
    pub function: String,
    /// Line number
    pub line: u32,
}

impl SiteInfo {
    /// Create a site description. Usually built by the [`site!`](crate::site) macro.
    pub fn new(file: impl Into<String>, function: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
            line,
        }
    }
}

/// Store-assigned identifier of an inserted entry.
///
/// Ids grow monotonically in insertion order and are the on-disk key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One structured log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Optional tag used for filtering and exclusion
    pub filter: Option<String>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Source file of the call site
    pub file: String,
    /// Function of the call site
    pub function: String,
    /// Line of the call site
    pub line: u32,
    /// Primary message
    pub message: String,
    /// Second message of two-part entries (e.g. a response to `message`'s request)
    pub message2: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>, site: SiteInfo) -> Self {
        Self {
            level,
            filter: None,
            timestamp: Utc::now(),
            file: site.file,
            function: site.function,
            line: site.line,
            message: message.into(),
            message2: None,
        }
    }

    /// Set the filter tag.
    pub fn with_filter(mut self, filter: Option<&str>) -> Self {
        self.filter = filter.map(str::to_string);
        self
    }

    /// Attach a second message.
    pub fn with_message2(mut self, message2: impl Into<String>) -> Self {
        self.message2 = Some(message2.into());
        self
    }

    /// Override the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The call site this entry was recorded at.
    pub fn site(&self) -> SiteInfo {
        SiteInfo::new(self.file.clone(), self.function.clone(), self.line)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.function, self.line, self.message)
    }
}

/// An entry as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Store-assigned id
    pub id: EntryId,
    /// The record
    pub entry: LogEntry,
}

impl std::ops::Deref for StoredEntry {
    type Target = LogEntry;

    fn deref(&self) -> &LogEntry {
        &self.entry
    }
}

/// On-disk form of a [`LogEntry`].
///
/// The level is kept as its raw value so that rows written with an unknown
/// level still decode (as `Debug`). `message2` arrived with schema version 2
/// and defaults to `None` for older rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    level_raw: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    timestamp: DateTime<Utc>,
    file: String,
    function: String,
    line: u32,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message2: Option<String>,
}

impl EntryRecord {
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl From<&LogEntry> for EntryRecord {
    fn from(entry: &LogEntry) -> Self {
        Self {
            level_raw: entry.level.raw(),
            filter: entry.filter.clone(),
            timestamp: entry.timestamp,
            file: entry.file.clone(),
            function: entry.function.clone(),
            line: entry.line,
            message: entry.message.clone(),
            message2: entry.message2.clone(),
        }
    }
}

impl From<EntryRecord> for LogEntry {
    fn from(record: EntryRecord) -> Self {
        Self {
            level: LogLevel::from_raw_or_default(record.level_raw),
            filter: record.filter,
            timestamp: record.timestamp,
            file: record.file,
            function: record.function,
            line: record.line,
            message: record.message,
            message2: record.message2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteInfo {
        SiteInfo::new("src/net.rs", "app::net::fetch", 42)
    }

    #[test]
    fn test_entry_builder() {
        let entry = LogEntry::new(LogLevel::Warn, "Request timed out", site())
            .with_filter(Some("Network"))
            .with_message2("status=504");

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.filter.as_deref(), Some("Network"));
        assert_eq!(entry.message2.as_deref(), Some("status=504"));
        assert_eq!(entry.site(), site());
        assert_eq!(entry.to_string(), "app::net::fetch:42 Request timed out");
    }

    #[test]
    fn test_record_serialization() {
        let entry = LogEntry::new(LogLevel::Error, "Banana Error", site()).with_filter(Some("Banana"));
        let bytes = EntryRecord::from(&entry).to_bytes().unwrap();
        let json = String::from_utf8(bytes.clone()).unwrap();
        assert!(json.contains("\"level_raw\":3"));
        assert!(!json.contains("message2"));

        let decoded: LogEntry = EntryRecord::from_bytes(&bytes).unwrap().into();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_record_with_unknown_level_decodes_as_debug() {
        let json = r#"{"level_raw":9,"timestamp":"2016-05-18T10:00:00Z","file":"a.rs","function":"f","line":1,"message":"m"}"#;
        let entry: LogEntry = EntryRecord::from_bytes(json.as_bytes()).unwrap().into();
        assert_eq!(entry.level, LogLevel::Debug);
        assert_eq!(entry.filter, None);
        assert_eq!(entry.message2, None);
    }
}
