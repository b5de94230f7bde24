//! persistlog CLI
//!
//! Thin wrapper around persistlog-core for inspecting and maintaining a log
//! store from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Write an entry
//! persistlog write warn "Request timed out" --filter Network
//!
//! # List entries, newest first, errors only
//! persistlog list --level error --desc
//!
//! # Entries from a time window
//! persistlog list --since 2026-01-21T14:00:00Z --until 2026-01-21T15:00:00Z
//!
//! # Run the mock generator and follow matching entries
//! persistlog tail --filter Banana --seconds 10
//!
//! # Counts per level and filter
//! persistlog stats
//!
//! # Share the last 500 entries as text, or everything as JSONL
//! persistlog export
//! persistlog export --format jsonl --output logs.jsonl
//!
//! # Delete entries, or remove the store entirely
//! persistlog clear --filter Kiwi
//! persistlog destroy
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use persistlog_core::{
    site, write_jsonl, LogEntry, LogLevel, Logger, LoggerConfig, ResultChange, Store, StoredEntry,
    LOG_MODEL_NAME,
};
use rand::Rng;
use tracing::{debug, info};

/// Entries included in a text share, as in the viewer's "Share (Last 500)"
const SHARE_LIMIT: usize = 500;

/// persistlog - persistent in-app diagnostic log
#[derive(Parser)]
#[command(name = "persistlog")]
#[command(version = "0.1.0")]
#[command(about = "persistlog - inspect, follow, export and clear a persistent log store")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Store directory (default: <data dir>/persistlog/Log)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Model name of the store
    #[arg(short, long, global = true, default_value = LOG_MODEL_NAME)]
    model: String,

    /// Logger settings as JSON (minimum_level, excluded_filters, ...)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one entry
    Write {
        /// Level: debug, info, warn, error
        level: LogLevel,

        /// Message text
        message: String,

        /// Filter tag
        #[arg(short, long)]
        filter: Option<String>,

        /// Second message (e.g. a response)
        #[arg(short, long)]
        response: Option<String>,
    },

    /// List entries
    List {
        /// Only entries with this filter
        #[arg(short, long)]
        filter: Option<String>,

        /// Only entries at or above this level
        #[arg(short, long)]
        level: Option<LogLevel>,

        /// Only entries at or after this time (RFC 3339)
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Only entries at or before this time (RFC 3339)
        #[arg(long)]
        until: Option<DateTime<Utc>>,

        /// Newest first
        #[arg(long)]
        desc: bool,

        /// Maximum number of entries
        #[arg(long)]
        limit: Option<usize>,

        /// Show one page of 20 entries (zero-based)
        #[arg(short, long)]
        page: Option<usize>,
    },

    /// Run the mock generator and print matching entries as they arrive
    Tail {
        /// Only entries with this filter
        #[arg(short, long)]
        filter: Option<String>,

        /// Only entries at or above this level
        #[arg(short, long)]
        level: Option<LogLevel>,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Show entry counts per level and filter
    Stats,

    /// Export entries
    Export {
        /// Output format
        #[arg(long, value_enum, default_value_t = ExportFormat::Text)]
        format: ExportFormat,

        /// Newest entries to include (text default: 500, jsonl default: all)
        #[arg(long)]
        limit: Option<usize>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete entries matching the filter and level (all by default)
    Clear {
        /// Only entries with this filter
        #[arg(short, long)]
        filter: Option<String>,

        /// Only entries at or above this level
        #[arg(short, long)]
        level: Option<LogLevel>,
    },

    /// Remove the store files
    Destroy,

    /// Fill the store with mock entries from several threads
    Demo {
        /// How long to generate
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    /// Share text: timestamp, function and message per entry
    Text,
    /// One JSON object per line
    Jsonl,
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default store directory (<data dir>/persistlog/Log)
fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("persistlog")
        .join("Log")
}

fn load_config(path: Option<&Path>) -> Result<LoggerConfig> {
    match path {
        Some(path) => LoggerConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display())),
        None => Ok(LoggerConfig::default()),
    }
}

/// One line per entry, plus an indented second message
fn format_row(row: &StoredEntry) -> String {
    let mut line = format!(
        "{} {:<5} [{}] {} ({}:{})",
        row.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        row.level.as_str().to_uppercase(),
        row.filter.as_deref().unwrap_or("-"),
        row.message,
        row.function,
        row.line,
    );
    if let Some(message2) = &row.message2 {
        for part in message2.lines() {
            line.push_str("\n    ");
            line.push_str(part);
        }
    }
    line
}

fn mock_network(logger: &Logger, n: u64) {
    logger.network(
        format!("GET http://test.someurl.com/items/{}\nAccept: application/json", n),
        "Status Code: 404\nDescription: not found",
        Some("Network"),
        site!(),
    );
}

fn mock_banana(logger: &Logger, _n: u64) {
    logger.error("Banana Error", Some("Banana"), site!());
}

fn mock_apple_info(logger: &Logger, n: u64) {
    logger.info(format!("Random Info #{}", n), Some("Apple"), site!());
}

fn mock_apple_debug(logger: &Logger, n: u64) {
    logger.debug(format!("Random Debug #{}", n), Some("Apple"), site!());
}

fn mock_orchard(logger: &Logger, n: u64) {
    let filter = if n % 2 == 0 { "Orange" } else { "Kiwi" };
    logger.warn(
        format!("{} crate running low", filter),
        Some(filter),
        site!(),
    );
}

/// Start the mock generator threads. They stop once `stop` is set.
fn spawn_generators(logger: &Logger, stop: &Arc<AtomicBool>) -> Result<Vec<JoinHandle<()>>> {
    let generators: [(&str, fn(&Logger, u64)); 5] = [
        ("network", mock_network),
        ("banana", mock_banana),
        ("apple-info", mock_apple_info),
        ("apple-debug", mock_apple_debug),
        ("orchard", mock_orchard),
    ];

    generators
        .into_iter()
        .map(|(name, emit)| {
            let logger = logger.clone();
            let stop = Arc::clone(stop);
            let handle = thread::Builder::new()
                .name(format!("mock-{}", name))
                .spawn(move || {
                    let mut counter = 0u64;
                    loop {
                        let pause = rand::rng().random_range(50..400);
                        thread::sleep(Duration::from_millis(pause));
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        counter += 1;
                        emit(&logger, counter);
                    }
                    debug!(generator = name, entries = counter, "Mock generator stopped");
                })?;
            Ok(handle)
        })
        .collect()
}

fn stop_generators(stop: &AtomicBool, handles: Vec<JoinHandle<()>>) {
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let dir = cli.dir.clone().unwrap_or_else(default_store_dir);
    let store = Store::open(&dir, &cli.model, false)
        .with_context(|| format!("Failed to open store in {}", dir.display()))?;
    info!(dir = %dir.display(), model = %cli.model, "Opened store");

    let mut config = load_config(cli.config.as_deref())?;
    // Commands that write always persist
    config.persist_to_store = true;
    let logger = Logger::builder(store.clone()).config(config).build();

    match cli.command {
        Commands::Write {
            level,
            message,
            filter,
            response,
        } => {
            let mut entry = LogEntry::new(level, message, site!())
                .with_filter(filter.as_deref());
            if let Some(response) = response {
                entry = entry.with_message2(response);
            }
            logger.submit(entry);
            logger.flush_async().await?;
            println!("Entries: {}", store.main().len());
        }

        Commands::List {
            filter,
            level,
            since,
            until,
            desc,
            limit,
            page,
        } => {
            let mut request = Logger::fetch_request()
                .with_predicate(Logger::build_predicate_between(
                    filter.as_deref(),
                    level,
                    since,
                    until,
                ))
                .with_sort(Logger::build_sort_descriptors(!desc));
            if let Some(limit) = limit {
                request = request.with_limit(limit);
            }
            let rows = match page {
                Some(page) => store.main().fetch_page(&request, page)?,
                None => store.main().fetch(&request)?,
            };
            if rows.is_empty() {
                println!("No entries.");
            }
            for row in &rows {
                println!("{}", format_row(row));
            }
        }

        Commands::Tail {
            filter,
            level,
            seconds,
        } => {
            let request = Logger::fetch_request()
                .with_predicate(Logger::build_predicate(filter.as_deref(), level));
            let mut live = logger.observe(request)?;
            for row in live.entries() {
                println!("{}", format_row(row));
            }

            let stop = Arc::new(AtomicBool::new(false));
            let handles = spawn_generators(&logger, &stop)?;
            let deadline = async {
                match seconds {
                    Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    changes = live.changed() => {
                        for change in changes? {
                            if let ResultChange::Insert { index } = change {
                                if let Some(row) = live.get(index) {
                                    println!("{}", format_row(row));
                                }
                            }
                        }
                    }
                    _ = &mut deadline => break,
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            stop_generators(&stop, handles);
            logger.flush_async().await?;
        }

        Commands::Stats => {
            let rows = store.main().fetch(&Logger::fetch_request())?;
            let mut levels: BTreeMap<LogLevel, usize> = BTreeMap::new();
            let mut filters: BTreeMap<String, usize> = BTreeMap::new();
            for row in &rows {
                *levels.entry(row.level).or_default() += 1;
                let filter = row.filter.clone().unwrap_or_else(|| "(none)".to_string());
                *filters.entry(filter).or_default() += 1;
            }

            println!("Store: {}", dir.join(store.model().file_name()).display());
            println!("Entries: {}", rows.len());
            if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
                println!("Range: {} .. {}", first.timestamp.to_rfc3339(), last.timestamp.to_rfc3339());
            }
            println!();
            println!("By level:");
            for level in LogLevel::all() {
                println!("  {:<7}{}", level.as_str(), levels.get(&level).copied().unwrap_or(0));
            }
            println!();
            println!("By filter:");
            for (filter, count) in &filters {
                println!("  {:<12}{}", filter, count);
            }
        }

        Commands::Export {
            format,
            limit,
            output,
        } => {
            let mut writer: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
                )),
                None => Box::new(io::stdout().lock()),
            };

            match format {
                ExportFormat::Text => {
                    let text = logger.share_text(limit.unwrap_or(SHARE_LIMIT))?;
                    writer.write_all(text.as_bytes())?;
                    writer.flush()?;
                }
                ExportFormat::Jsonl => {
                    let mut request = Logger::fetch_request()
                        .with_sort(Logger::build_sort_descriptors(false));
                    if let Some(limit) = limit {
                        request = request.with_limit(limit);
                    }
                    let mut rows = store.main().fetch(&request)?;
                    rows.reverse();
                    let written = write_jsonl(&rows, &mut writer)?;
                    info!(entries = written, "Exported entries");
                }
            }

            if let Some(path) = output {
                eprintln!("Exported to {}", path.display());
            }
        }

        Commands::Clear { filter, level } => {
            let request = Logger::fetch_request()
                .with_predicate(Logger::build_predicate(filter.as_deref(), level));
            let matching = store.main().count(&request)?;
            logger
                .delete_entries_async(None, filter.as_deref(), level)
                .await?;
            logger.flush_async().await?;
            println!("Deleted {} entries.", matching);
        }

        Commands::Destroy => {
            store.destroy()?;
            println!("Destroyed store in {}", dir.display());
        }

        Commands::Demo { seconds } => {
            let stop = Arc::new(AtomicBool::new(false));
            let handles = spawn_generators(&logger, &stop)?;
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            stop_generators(&stop, handles);
            logger.flush_async().await?;
            println!("Entries: {}", store.main().len());
        }
    }

    Ok(())
}
