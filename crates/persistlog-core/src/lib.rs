//! persistlog Core Library
//!
//! Persistent in-app diagnostic logging: a write-behind store for structured
//! log entries with filtered, sorted, paginated reads.
//!
//! ## Overview
//!
//! ```text
//! caller ──► Logger (gates, echo) ──► ConcurrentContext
//!                                         │ commit
//!                                         ▼
//!                              MainContext (main queue, view) ──► LiveQuery
//!                                         │
//!                                         ▼
//!                              WritingContext (io queue) ──► redb file
//! ```
//!
//! - **Non-blocking writes**: logging never waits on disk
//! - **Ordered commits**: one main queue and one io queue serialize the chain
//! - **Live results**: observers get row-level change batches after commits
//!
//! ## Quick Start
//!
//! ```ignore
//! use persistlog_core::{log_error, log_info, Logger, LoggerConfig, LogLevel, Store};
//!
//! let store = Store::open(data_dir.join("Log"), "LogModel", false)?;
//! let logger = Logger::builder(store)
//!     .config(LoggerConfig {
//!         minimum_level: LogLevel::Info,
//!         persist_to_store: true,
//!         ..LoggerConfig::default()
//!     })
//!     .build();
//!
//! log_info!(logger, filter: "Network", "GET {} -> {}", url, status);
//! log_error!(logger, "Banana Error");
//!
//! let request = Logger::fetch_request()
//!     .with_predicate(Logger::build_predicate(Some("Network"), None))
//!     .with_sort(Logger::build_sort_descriptors(false));
//! for row in logger.fetch(&request)? {
//!     println!("{} {}", row.timestamp, row.message);
//! }
//!
//! logger.flush()?;
//! ```

pub mod entry;
pub mod error;
pub mod export;
pub mod layer;
pub mod level;
pub mod live;
pub mod logger;
mod macros;
pub mod model;
pub mod query;
pub mod queue;
pub mod store;

// Re-exports
pub use entry::{EntryId, LogEntry, SiteInfo, StoredEntry};
pub use error::{StoreError, StoreResult};
pub use export::{read_jsonl, render_text, write_jsonl, ExportRecord};
pub use layer::StoreLayer;
pub use level::{LogLevel, ParseLevelError};
pub use live::{diff, LiveQuery, ResultChange};
pub use logger::{
    format_echo, CaptureEcho, Echo, Logger, LoggerBuilder, LoggerConfig, StderrEcho, TracingEcho,
};
pub use model::{ModelBundle, ModelDefinition, LOG_MODEL_NAME, LOG_SCHEMA_VERSION};
pub use query::{
    compare_entries, Condition, FetchRequest, Predicate, SortDescriptor, SortKey,
    DEFAULT_BATCH_SIZE,
};
pub use queue::SerialQueue;
pub use store::{
    Completion, ConcurrentContext, MainContext, Store, StoreChange, WritingContext,
};
