//! `tracing` bridge that persists events through a [`Logger`].
//!
//! ```ignore
//! use persistlog_core::{Logger, StoreLayer};
//! use tracing_subscriber::prelude::*;
//!
//! let subscriber = tracing_subscriber::registry()
//!     .with(StoreLayer::new(logger.clone()))
//!     .with(tracing_subscriber::fmt::layer());
//! tracing::subscriber::set_global_default(subscriber)?;
//!
//! tracing::warn!(filter = "Network", status = 504, "Request timed out");
//! ```

use std::fmt::Write as FmtWrite;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::entry::{LogEntry, SiteInfo};
use crate::level::LogLevel;
use crate::logger::Logger;

/// Targets under this prefix are the store's own diagnostics.
const OWN_TARGET: &str = "persistlog_core";

/// A tracing Layer that turns events into log entries.
///
/// The event's `filter` field becomes the entry filter; without one the
/// target is used. Other fields are appended to the message as `key=value`.
pub struct StoreLayer {
    logger: Logger,
}

impl StoreLayer {
    /// Persist events through `logger` (its gates apply).
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

fn map_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warn,
        Level::INFO => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

impl<S: Subscriber> Layer<S> for StoreLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message.unwrap_or_default();
        if !visitor.fields.is_empty() {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&visitor.fields.join(" "));
        }

        let site = SiteInfo::new(
            metadata.file().unwrap_or("<unknown>"),
            metadata.module_path().unwrap_or_else(|| metadata.target()),
            metadata.line().unwrap_or(0),
        );
        let filter = visitor.filter.as_deref().unwrap_or_else(|| metadata.target());

        self.logger.submit(
            LogEntry::new(map_level(metadata.level()), message, site).with_filter(Some(filter)),
        );
    }
}

/// Collects the message, the `filter` field and the remaining fields.
#[derive(Default)]
struct EntryVisitor {
    message: Option<String>,
    filter: Option<String>,
    fields: Vec<String>,
}

impl Visit for EntryVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        match field.name() {
            "message" => self.message = Some(buf),
            "filter" => self.filter = Some(buf.trim_matches('"').to_string()),
            name => self.fields.push(format!("{}={}", name, buf)),
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "filter" => self.filter = Some(value.to_string()),
            name => self.fields.push(format!("{}={}", name, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LoggerConfig;
    use crate::store::Store;
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    fn logger(temp: &TempDir) -> Logger {
        let store = Store::open(temp.path(), "LogModel", true).unwrap();
        Logger::builder(store)
            .config(LoggerConfig {
                persist_to_store: true,
                ..LoggerConfig::default()
            })
            .build()
    }

    #[test]
    fn test_store_layer_captures_events() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);
        let subscriber = tracing_subscriber::registry().with(StoreLayer::new(logger.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app::net", "Test message");
            tracing::warn!(target: "app::net", filter = "Network", status = 504, "Request timed out");
            tracing::trace!(target: "app::ui", "Verbose");
        });
        logger.flush().unwrap();

        let rows = logger.fetch(&Logger::fetch_request()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].message, "Test message");
        assert_eq!(rows[0].filter.as_deref(), Some("app::net"));
        assert_eq!(rows[1].level, LogLevel::Warn);
        assert_eq!(rows[1].filter.as_deref(), Some("Network"));
        assert_eq!(rows[1].message, "Request timed out status=504");
        assert_eq!(rows[2].level, LogLevel::Debug);
    }

    #[test]
    fn test_store_layer_ignores_own_events() {
        let temp = TempDir::new().unwrap();
        let logger = logger(&temp);
        let subscriber = tracing_subscriber::registry().with(StoreLayer::new(logger.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "persistlog_core::store", "internal");
        });
        logger.flush().unwrap();
        assert!(logger.main_context().is_empty());
    }
}
