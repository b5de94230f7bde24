//! Application-facing log facade.
//!
//! A [`Logger`] gates entries by filter and minimum level, optionally echoes
//! them to a console sink and persists them through a [`Store`] without
//! blocking the caller.
//!
//! ```no_run
//! use persistlog_core::{log_info, Logger, LoggerConfig, Store};
//!
//! # fn main() -> Result<(), persistlog_core::StoreError> {
//! let store = Store::open("/tmp/logs", "LogModel", false)?;
//! let logger = Logger::builder(store)
//!     .config(LoggerConfig {
//!         persist_to_store: true,
//!         ..LoggerConfig::default()
//!     })
//!     .build();
//!
//! log_info!(logger, filter: "Network", "fetched {} bytes", 512);
//! logger.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod echo;

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error};

pub use echo::{format_echo, CaptureEcho, Echo, StderrEcho, TracingEcho};

use crate::entry::{LogEntry, SiteInfo, StoredEntry};
use crate::error::{StoreError, StoreResult};
use crate::export::render_text;
use crate::level::LogLevel;
use crate::live::LiveQuery;
use crate::query::{Condition, FetchRequest, Predicate, SortDescriptor, DEFAULT_BATCH_SIZE};
use crate::store::{Completion, ConcurrentContext, MainContext, Store};

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Gate and output settings of a [`Logger`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Entries below this level are dropped
    pub minimum_level: LogLevel,
    /// Entries tagged with one of these filters are dropped
    pub excluded_filters: Vec<String>,
    /// Echo accepted entries to the console sink
    pub echo_to_console: bool,
    /// Persist accepted entries to the store
    pub persist_to_store: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            minimum_level: LogLevel::Debug,
            excluded_filters: Vec::new(),
            echo_to_console: false,
            persist_to_store: false,
        }
    }
}

impl LoggerConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    /// Parse a config from JSON text.
    pub fn from_json(data: &str) -> StoreResult<Self> {
        serde_json::from_str(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Gate values read on every log call.
struct GateState {
    minimum_level: AtomicI16,
    echo_to_console: AtomicBool,
    persist_to_store: AtomicBool,
    excluded_filters: RwLock<HashSet<String>>,
}

impl GateState {
    fn from_config(config: &LoggerConfig) -> Self {
        Self {
            minimum_level: AtomicI16::new(config.minimum_level.raw()),
            echo_to_console: AtomicBool::new(config.echo_to_console),
            persist_to_store: AtomicBool::new(config.persist_to_store),
            excluded_filters: RwLock::new(config.excluded_filters.iter().cloned().collect()),
        }
    }

    fn minimum_level(&self) -> LogLevel {
        LogLevel::from_raw_or_default(self.minimum_level.load(Ordering::Relaxed))
    }

    fn is_excluded(&self, filter: Option<&str>) -> bool {
        match filter {
            Some(filter) => self.excluded_filters.read().contains(filter),
            None => false,
        }
    }
}

struct LoggerInner {
    store: Store,
    gates: Arc<GateState>,
    echo: Box<dyn Echo>,
}

/// Builder for a [`Logger`].
pub struct LoggerBuilder {
    store: Store,
    config: LoggerConfig,
    echo: Box<dyn Echo>,
}

impl LoggerBuilder {
    /// Use these gate settings.
    pub fn config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a different echo sink (default: [`StderrEcho`]).
    pub fn echo(mut self, echo: impl Echo) -> Self {
        self.echo = Box::new(echo);
        self
    }

    /// Build the logger.
    pub fn build(self) -> Logger {
        Logger {
            inner: Arc::new(LoggerInner {
                store: self.store,
                gates: Arc::new(GateState::from_config(&self.config)),
                echo: self.echo,
            }),
        }
    }
}

/// Handle to a logger. Cheap to clone; clones share gates and store.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

impl Logger {
    /// A logger with default settings: every level accepted, no echo, no
    /// persistence.
    pub fn new(store: Store) -> Self {
        Self::builder(store).build()
    }

    /// Start building a logger over `store`.
    pub fn builder(store: Store) -> LoggerBuilder {
        LoggerBuilder {
            store,
            config: LoggerConfig::default(),
            echo: Box::new(StderrEcho),
        }
    }

    /// Make `logger` the process-wide default. Fails (returning it) if one
    /// is already installed.
    pub fn install_global(logger: Logger) -> Result<(), Logger> {
        GLOBAL.set(logger)
    }

    /// The process-wide default, if installed.
    pub fn global() -> Option<&'static Logger> {
        GLOBAL.get()
    }

    /// The underlying store.
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// The store's main context.
    pub fn main_context(&self) -> &MainContext {
        self.inner.store.main()
    }

    /// A new concurrent context on the store.
    pub fn concurrent_context(&self) -> ConcurrentContext {
        self.inner.store.new_concurrent_context()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Logging
    // ═══════════════════════════════════════════════════════════════════════

    /// Record one entry, subject to the exclusion and minimum-level gates.
    pub fn log(&self, level: LogLevel, message: impl Into<String>, filter: Option<&str>, site: SiteInfo) {
        self.submit(LogEntry::new(level, message, site).with_filter(filter));
    }

    /// Log at `Debug`.
    pub fn debug(&self, message: impl Into<String>, filter: Option<&str>, site: SiteInfo) {
        self.log(LogLevel::Debug, message, filter, site);
    }

    /// Log at `Info`.
    pub fn info(&self, message: impl Into<String>, filter: Option<&str>, site: SiteInfo) {
        self.log(LogLevel::Info, message, filter, site);
    }

    /// Log at `Warn`.
    pub fn warn(&self, message: impl Into<String>, filter: Option<&str>, site: SiteInfo) {
        self.log(LogLevel::Warn, message, filter, site);
    }

    /// Log at `Error`.
    pub fn error(&self, message: impl Into<String>, filter: Option<&str>, site: SiteInfo) {
        self.log(LogLevel::Error, message, filter, site);
    }

    /// Log a request/response pair at `Info`.
    pub fn network(
        &self,
        request: impl Into<String>,
        response: impl Into<String>,
        filter: Option<&str>,
        site: SiteInfo,
    ) {
        self.submit(
            LogEntry::new(LogLevel::Info, request, site)
                .with_filter(filter)
                .with_message2(response),
        );
    }

    /// Gate, echo and persist a prepared entry.
    pub fn submit(&self, entry: LogEntry) {
        let gates = &self.inner.gates;

        if gates.is_excluded(entry.filter.as_deref()) {
            return;
        }
        if entry.level < gates.minimum_level() {
            return;
        }

        if gates.echo_to_console.load(Ordering::Relaxed) {
            self.inner.echo.echo(&entry);
        }

        if gates.persist_to_store.load(Ordering::Relaxed) {
            let store = &self.inner.store;
            let context = store.new_concurrent_context();
            context.insert(entry);
            store.commit(&context, None);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Settings
    // ═══════════════════════════════════════════════════════════════════════

    /// Change the minimum level. Applied on the main queue.
    pub fn set_minimum_level(&self, level: LogLevel) -> StoreResult<()> {
        let gates = Arc::clone(&self.inner.gates);
        self.inner.store.perform_on_main(move || {
            gates.minimum_level.store(level.raw(), Ordering::Relaxed);
            debug!(%level, "Minimum log level changed");
        })
    }

    /// Replace the excluded filters. Applied on the main queue.
    pub fn set_excluded_filters<I, S>(&self, filters: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filters: HashSet<String> = filters.into_iter().map(Into::into).collect();
        let gates = Arc::clone(&self.inner.gates);
        self.inner.store.perform_on_main(move || {
            *gates.excluded_filters.write() = filters;
        })
    }

    /// Toggle console echo. Applied on the main queue.
    pub fn set_echo_to_console(&self, enabled: bool) -> StoreResult<()> {
        let gates = Arc::clone(&self.inner.gates);
        self.inner.store.perform_on_main(move || {
            gates.echo_to_console.store(enabled, Ordering::Relaxed);
        })
    }

    /// Toggle persistence. Applied on the main queue.
    pub fn set_persist_to_store(&self, enabled: bool) -> StoreResult<()> {
        let gates = Arc::clone(&self.inner.gates);
        self.inner.store.perform_on_main(move || {
            gates.persist_to_store.store(enabled, Ordering::Relaxed);
        })
    }

    /// Current minimum level.
    pub fn minimum_level(&self) -> LogLevel {
        self.inner.gates.minimum_level()
    }

    /// Current excluded filters, sorted.
    pub fn excluded_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.inner.gates.excluded_filters.read().iter().cloned().collect();
        filters.sort();
        filters
    }

    /// Whether console echo is on.
    pub fn echo_to_console(&self) -> bool {
        self.inner.gates.echo_to_console.load(Ordering::Relaxed)
    }

    /// Whether persistence is on.
    pub fn persist_to_store(&self) -> bool {
        self.inner.gates.persist_to_store.load(Ordering::Relaxed)
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> LoggerConfig {
        LoggerConfig {
            minimum_level: self.minimum_level(),
            excluded_filters: self.excluded_filters(),
            echo_to_console: self.echo_to_console(),
            persist_to_store: self.persist_to_store(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Conjunction of `filter == filter` and `level >= level`; empty when
    /// both are `None`.
    pub fn build_predicate(filter: Option<&str>, level: Option<LogLevel>) -> Predicate {
        Self::build_predicate_between(filter, level, None, None)
    }

    /// [`build_predicate`](Self::build_predicate) with an optional time range.
    pub fn build_predicate_between(
        filter: Option<&str>,
        level: Option<LogLevel>,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Predicate {
        let mut predicate = Predicate::all();
        if let Some(filter) = filter {
            predicate = predicate.and(Condition::FilterEquals(filter.to_string()));
        }
        if let Some(level) = level {
            predicate = predicate.and(Condition::LevelAtLeast(level));
        }
        if let Some(since) = since {
            predicate = predicate.and(Condition::Since(since));
        }
        if let Some(until) = until {
            predicate = predicate.and(Condition::Until(until));
        }
        predicate
    }

    /// Single timestamp ordering.
    pub fn build_sort_descriptors(time_ascending: bool) -> Vec<SortDescriptor> {
        vec![SortDescriptor::timestamp(time_ascending)]
    }

    /// Request over all entries with a batch size of 20.
    pub fn fetch_request() -> FetchRequest {
        FetchRequest::new().with_batch_size(DEFAULT_BATCH_SIZE)
    }

    /// Read from the main view.
    pub fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<StoredEntry>> {
        self.inner.store.main().fetch(request)
    }

    /// Live view of the rows matching `request`.
    pub fn observe(&self, request: FetchRequest) -> StoreResult<LiveQuery> {
        self.inner.store.observe(request)
    }

    /// The newest `limit` entries, oldest first, in the share text format.
    pub fn share_text(&self, limit: usize) -> StoreResult<String> {
        let request = Self::fetch_request()
            .with_sort(Self::build_sort_descriptors(false))
            .with_limit(limit);
        let mut rows = self.fetch(&request)?;
        rows.reverse();
        Ok(render_text(&rows))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Deletion
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete every entry matching `filter` and `level`.
    ///
    /// With a context, matching rows are fetched and deleted in it and the
    /// context is committed. Without one, the work runs on the main queue
    /// and is saved with `commit_main`. Never waits; `on_complete` runs on the
    /// main queue. Failures are also logged through [`error`](Self::error).
    pub fn delete_entries(
        &self,
        context: Option<&ConcurrentContext>,
        filter: Option<&str>,
        level: Option<LogLevel>,
        on_complete: Option<Completion>,
    ) {
        let request = Self::fetch_request().with_predicate(Self::build_predicate(filter, level));
        let completion = self.reporting(on_complete);

        match context {
            Some(context) => match context.fetch(&request) {
                Ok(rows) => {
                    debug!(rows = rows.len(), "Deleting entries in concurrent context");
                    for row in rows {
                        context.delete(row.id);
                    }
                    self.inner.store.commit(context, Some(completion));
                }
                Err(e) => self.fail_on_main(completion, e),
            },
            None => {
                let logger = self.clone();
                let result = self.inner.store.perform_on_main(move || {
                    let store = &logger.inner.store;
                    match store.main().fetch(&request) {
                        Ok(rows) => {
                            debug!(rows = rows.len(), "Deleting entries on main context");
                            for row in rows {
                                store.main().delete(row.id);
                            }
                            store.commit_main(Some(completion));
                        }
                        Err(e) => completion(Err(e)),
                    }
                });
                if let Err(e) = result {
                    error!(error = %e, "Unable to schedule delete");
                }
            }
        }
    }

    /// Await [`delete_entries`](Self::delete_entries).
    pub async fn delete_entries_async(
        &self,
        context: Option<&ConcurrentContext>,
        filter: Option<&str>,
        level: Option<LogLevel>,
    ) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.delete_entries(
            context,
            filter,
            level,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        rx.await.map_err(|_| StoreError::QueueClosed("main"))?
    }

    /// Delete every entry.
    pub fn clear(&self, context: Option<&ConcurrentContext>, on_complete: Option<Completion>) {
        self.delete_entries(context, None, None, on_complete);
    }

    /// Wrap a completion so failures are also written to the log.
    fn reporting(&self, on_complete: Option<Completion>) -> Completion {
        let logger = self.clone();
        Box::new(move |result: StoreResult<()>| {
            if let Err(e) = &result {
                logger.error(
                    format!("Failed to delete log entries: {}", e),
                    None,
                    crate::site!(),
                );
            }
            if let Some(on_complete) = on_complete {
                on_complete(result);
            }
        })
    }

    fn fail_on_main(&self, completion: Completion, e: StoreError) {
        if let Err(dispatch) = self.inner.store.perform_on_main(move || completion(Err(e))) {
            error!(error = %dispatch, "Unable to deliver delete failure");
        }
    }

    /// Block until every pending write has reached disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.inner.store.flush()
    }

    /// Async form of [`flush`](Self::flush).
    pub async fn flush_async(&self) -> StoreResult<()> {
        self.inner.store.flush_async().await
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("store", &self.inner.store)
            .field("config", &self.config())
            .finish()
    }
}
