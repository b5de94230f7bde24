//! Console echo sinks.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::LogEntry;
use crate::level::LogLevel;

const RULE: &str = "--------------------------------------";

/// Receives every entry that passes the logger's gates while echo is enabled.
pub trait Echo: Send + Sync + 'static {
    /// Emit one entry.
    fn echo(&self, entry: &LogEntry);
}

/// Render an entry as the framed console block.
///
/// ```text
/// +
/// File: src/net.rs
/// Function: app::net::fetch, Line: 42
/// --------------------------------------
/// Request timed out
/// +
/// ```
pub fn format_echo(entry: &LogEntry) -> String {
    let mut block = format!(
        "+\nFile: {}\nFunction: {}, Line: {}\n{}\n{}\n",
        entry.file, entry.function, entry.line, RULE, entry.message
    );
    if let Some(message2) = &entry.message2 {
        block.push_str(RULE);
        block.push('\n');
        block.push_str(message2);
        block.push('\n');
    }
    block.push('+');
    block
}

/// Writes framed blocks to standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrEcho;

impl Echo for StderrEcho {
    fn echo(&self, entry: &LogEntry) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", format_echo(entry));
    }
}

/// Forwards entries to `tracing` at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEcho;

impl Echo for TracingEcho {
    fn echo(&self, entry: &LogEntry) {
        let filter = entry.filter.as_deref().unwrap_or("");
        match entry.level {
            LogLevel::Debug => tracing::debug!(filter, function = %entry.function, line = entry.line, "{}", entry.message),
            LogLevel::Info => tracing::info!(filter, function = %entry.function, line = entry.line, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(filter, function = %entry.function, line = entry.line, "{}", entry.message),
            LogLevel::Error => tracing::error!(filter, function = %entry.function, line = entry.line, "{}", entry.message),
        }
    }
}

/// Keeps echoed blocks in memory.
#[derive(Debug, Default, Clone)]
pub struct CaptureEcho {
    blocks: Arc<Mutex<Vec<String>>>,
}

impl CaptureEcho {
    /// An empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks captured so far.
    pub fn blocks(&self) -> Vec<String> {
        self.blocks.lock().clone()
    }

    /// Number of captured blocks.
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// True when nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Drop captured blocks.
    pub fn clear(&self) {
        self.blocks.lock().clear();
    }
}

impl Echo for CaptureEcho {
    fn echo(&self, entry: &LogEntry) {
        self.blocks.lock().push(format_echo(entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SiteInfo;

    #[test]
    fn test_format_echo_block() {
        let entry = LogEntry::new(
            LogLevel::Warn,
            "Request timed out",
            SiteInfo::new("src/net.rs", "app::net::fetch", 42),
        );
        assert_eq!(
            format_echo(&entry),
            "+\nFile: src/net.rs\nFunction: app::net::fetch, Line: 42\n\
             --------------------------------------\nRequest timed out\n+"
        );
    }

    #[test]
    fn test_format_echo_with_second_message() {
        let entry = LogEntry::new(LogLevel::Info, "GET /", SiteInfo::new("a.rs", "f", 1))
            .with_message2("404");
        let block = format_echo(&entry);
        assert!(block.ends_with("GET /\n--------------------------------------\n404\n+"));
    }

    #[test]
    fn test_capture_echo() {
        let capture = CaptureEcho::new();
        let shared = capture.clone();
        shared.echo(&LogEntry::new(LogLevel::Info, "x", SiteInfo::new("a.rs", "f", 1)));
        assert_eq!(capture.len(), 1);
        capture.clear();
        assert!(capture.is_empty());
    }
}
