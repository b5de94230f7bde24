//! Severity levels for log entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a log entry, ordered `Debug < Info < Warn < Error`.
///
/// The raw `i16` values are what the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug = 0,
    /// Normal operational messages
    Info = 1,
    /// Something unexpected that the app recovered from
    Warn = 2,
    /// Failures
    Error = 3,
}

impl LogLevel {
    /// All levels in ascending severity.
    pub fn all() -> [LogLevel; 4] {
        [LogLevel::Debug, LogLevel::Info, LogLevel::Warn, LogLevel::Error]
    }

    /// The persisted raw value.
    pub fn raw(self) -> i16 {
        self as i16
    }

    /// Decode a raw value, `None` if it is not a known level.
    pub fn from_raw(raw: i16) -> Option<LogLevel> {
        match raw {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Decode a raw value, falling back to `Debug` for unknown values.
    pub fn from_raw_or_default(raw: i16) -> LogLevel {
        Self::from_raw(raw).unwrap_or_default()
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Debug
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(pub String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);

        let mut sorted = LogLevel::all().to_vec();
        sorted.sort();
        assert_eq!(sorted, LogLevel::all());
    }

    #[test]
    fn test_raw_roundtrip() {
        for level in LogLevel::all() {
            assert_eq!(LogLevel::from_raw(level.raw()), Some(level));
        }
    }

    #[test]
    fn test_unknown_raw_defaults_to_debug() {
        assert_eq!(LogLevel::from_raw(42), None);
        assert_eq!(LogLevel::from_raw_or_default(42), LogLevel::Debug);
        assert_eq!(LogLevel::from_raw_or_default(-1), LogLevel::Debug);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("fatal".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, "\"warn\"");
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
    }
}
