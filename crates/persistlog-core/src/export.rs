//! Export of stored entries.
//!
//! * [`render_text`]: the plain-text "share" buffer
//! * [`write_jsonl`] / [`read_jsonl`]: one self-contained JSON object per line

use std::io::{BufRead, Write};

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::entry::StoredEntry;
use crate::error::{StoreError, StoreResult};
use crate::level::LogLevel;

/// One exported entry, one JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Store-assigned id
    pub id: u64,
    /// RFC 3339 timestamp with milliseconds (e.g. "2026-01-21T14:30:45.123Z")
    pub ts: String,
    /// Lowercase level name
    pub level: LogLevel,
    /// Filter tag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Source file
    pub file: String,
    /// Function
    pub function: String,
    /// Line
    pub line: u32,
    /// Primary message
    pub msg: String,
    /// Second message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg2: Option<String>,
}

impl From<&StoredEntry> for ExportRecord {
    fn from(row: &StoredEntry) -> Self {
        Self {
            id: row.id.0,
            ts: row.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            level: row.level,
            filter: row.filter.clone(),
            file: row.file.clone(),
            function: row.function.clone(),
            line: row.line,
            msg: row.message.clone(),
            msg2: row.message2.clone(),
        }
    }
}

/// Render entries in the share format:
///
/// ```text
/// <timestamp>:
/// <function>
/// <message>
/// [<message2>]
///
/// ```
pub fn render_text(entries: &[StoredEntry]) -> String {
    let mut buffer = String::new();
    for row in entries {
        buffer.push_str(&row.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
        buffer.push_str(":\n");
        buffer.push_str(&row.function);
        buffer.push('\n');
        buffer.push_str(&row.message);
        buffer.push('\n');
        if let Some(message2) = &row.message2 {
            buffer.push_str(message2);
            buffer.push('\n');
        }
        buffer.push('\n');
    }
    buffer
}

/// Write one [`ExportRecord`] per line. Returns the number of lines written.
pub fn write_jsonl<W: Write>(entries: &[StoredEntry], mut writer: W) -> StoreResult<usize> {
    for row in entries {
        let json = serde_json::to_string(&ExportRecord::from(row))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        writeln!(writer, "{}", json)?;
    }
    writer.flush()?;
    Ok(entries.len())
}

/// Parse JSONL produced by [`write_jsonl`]. Blank lines are skipped.
pub fn read_jsonl<R: BufRead>(reader: R) -> StoreResult<Vec<ExportRecord>> {
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| StoreError::Serialization(e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryId, LogEntry, SiteInfo};
    use chrono::{TimeZone, Utc};

    fn row(id: u64, message: &str) -> StoredEntry {
        StoredEntry {
            id: EntryId(id),
            entry: LogEntry::new(LogLevel::Error, message, SiteInfo::new("a.rs", "app::run", 3))
                .with_filter(Some("Banana"))
                .with_timestamp(Utc.with_ymd_and_hms(2016, 5, 18, 10, 0, 0).unwrap()),
        }
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&[row(1, "Banana Error")]);
        assert_eq!(text, "2016-05-18T10:00:00.000Z:\napp::run\nBanana Error\n\n");
        assert_eq!(render_text(&[]), "");
    }

    #[test]
    fn test_render_text_includes_second_message() {
        let mut entry = row(1, "GET /");
        entry.entry.message2 = Some("404".to_string());
        assert!(render_text(&[entry]).ends_with("GET /\n404\n\n"));
    }

    #[test]
    fn test_jsonl_lines() {
        let mut buffer = Vec::new();
        let written = write_jsonl(&[row(1, "a"), row(2, "b")], &mut buffer).unwrap();
        assert_eq!(written, 2);

        let text = String::from_utf8(buffer.clone()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"level\":\"error\""));
        assert!(lines[0].contains("\"filter\":\"Banana\""));
        assert!(!lines[0].contains("msg2"));

        let records = read_jsonl(buffer.as_slice()).unwrap();
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].msg, "b");
    }
}
