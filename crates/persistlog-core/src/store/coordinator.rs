//! redb-backed disk coordinator.
//!
//! The coordinator is the only component that touches the database. The
//! writing context calls into it from the io queue; `Store::open` and
//! `Store::destroy` use it directly.

use std::error::Error as StdError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use super::context::Change;
use crate::entry::{EntryId, EntryRecord, LogEntry, StoredEntry};
use crate::error::{StoreError, StoreResult};
use crate::model::ModelDefinition;

// Table definitions
const ENTRIES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("log_entries");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";

type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error("store schema version {found} is newer than model {model} version {expected}")]
struct SchemaTooNew {
    model: String,
    found: u64,
    expected: u32,
}

/// Where the database lives.
#[derive(Debug, Clone)]
enum Backing {
    File { directory: PathBuf, file_name: String },
    Memory,
}

/// Mediates all disk I/O for one store.
pub(crate) struct Coordinator {
    db: Database,
    primary: PathBuf,
    backing: Backing,
}

impl Coordinator {
    /// Open (or create) the database for `model` inside `directory`.
    ///
    /// On failure every store file is removed before the error is returned,
    /// unless the file is held open by another handle.
    pub(crate) fn open(
        directory: &Path,
        model: &ModelDefinition,
        in_memory: bool,
    ) -> StoreResult<Self> {
        let file_name = model.file_name();
        let path = directory.join(&file_name);

        if in_memory {
            let db = Self::open_memory(model).map_err(|source| StoreError::StoreOpenFailure {
                path: path.clone(),
                source,
            })?;
            return Ok(Self {
                db,
                primary: path,
                backing: Backing::Memory,
            });
        }

        // Create the container directory if needed
        if let Err(e) = fs::create_dir_all(directory) {
            warn!(path = %directory.display(), error = %e, "Unable to create store directory");
            return Err(StoreError::StoreOpenFailure {
                path,
                source: Box::new(e),
            });
        }

        let db = match Database::create(&path) {
            Ok(db) => db,
            Err(redb::DatabaseError::DatabaseAlreadyOpen) => {
                warn!(path = %path.display(), "Store is already open elsewhere; leaving files in place");
                return Err(StoreError::StoreOpenFailure {
                    path,
                    source: Box::new(redb::DatabaseError::DatabaseAlreadyOpen),
                });
            }
            Err(e) => return Err(Self::discard_files(directory, &file_name, path, Box::new(e))),
        };

        if let Err(source) = Self::prepare(&db, model) {
            drop(db);
            return Err(Self::discard_files(directory, &file_name, path, source));
        }

        info!(path = %path.display(), version = model.version, "Opened log store");
        Ok(Self {
            db,
            primary: path,
            backing: Backing::File {
                directory: directory.to_path_buf(),
                file_name,
            },
        })
    }

    fn open_memory(model: &ModelDefinition) -> Result<Database, BoxError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::prepare(&db, model)?;
        Ok(db)
    }

    /// Remove the store files after a failed open and build the error.
    fn discard_files(directory: &Path, file_name: &str, path: PathBuf, source: BoxError) -> StoreError {
        warn!(
            path = %path.display(),
            error = %source,
            "Opening the store failed; removing store files"
        );
        if let Err(e) = remove_store_files(directory, file_name) {
            warn!(error = %e, "Unable to remove store files after failed open");
        }
        StoreError::StoreOpenFailure { path, source }
    }

    /// Close a store that opened but could not be loaded, removing its files.
    pub(crate) fn abandon(self, source: StoreError) -> StoreError {
        let Coordinator { db, primary, backing } = self;
        drop(db);
        match backing {
            Backing::File {
                directory,
                file_name,
            } => Self::discard_files(&directory, &file_name, primary, Box::new(source)),
            Backing::Memory => StoreError::StoreOpenFailure {
                path: primary,
                source: Box::new(source),
            },
        }
    }

    /// Entries on disk and the next free id, read once after open.
    pub(crate) fn initial_state(&self) -> StoreResult<(Vec<StoredEntry>, u64)> {
        let entries = self.load_entries()?;
        let next_id = self.last_id()?.map(|id| id.0 + 1).unwrap_or(1);
        Ok((entries, next_id))
    }

    /// Create tables and bring the schema up to the model's version.
    fn prepare(db: &Database, model: &ModelDefinition) -> Result<(), BoxError> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES_TABLE)?;
            let mut meta = write_txn.open_table(META_TABLE)?;
            let stored = meta.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
            let target = u64::from(model.version);

            match stored {
                None => {
                    meta.insert(SCHEMA_VERSION_KEY, target)?;
                }
                Some(found) if found > target => {
                    return Err(Box::new(SchemaTooNew {
                        model: model.name.clone(),
                        found,
                        expected: model.version,
                    }));
                }
                Some(found) if found < target => {
                    for from in found..target {
                        migrate_step(from);
                    }
                    meta.insert(SCHEMA_VERSION_KEY, target)?;
                    info!(from = found, to = target, "Migrated store schema");
                }
                Some(_) => {}
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Primary file path, `None` for in-memory stores.
    pub(crate) fn path(&self) -> Option<PathBuf> {
        match &self.backing {
            Backing::File {
                directory,
                file_name,
            } => Some(directory.join(file_name)),
            Backing::Memory => None,
        }
    }

    /// Schema version recorded in the store.
    pub(crate) fn schema_version(&self) -> StoreResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let meta = read_txn.open_table(META_TABLE)?;
        let version = meta.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
        Ok(version)
    }

    /// Read every entry in key order.
    ///
    /// Rows that fail to decode are skipped with a warning.
    pub(crate) fn load_entries(&self) -> StoreResult<Vec<StoredEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;

        let mut entries = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            match EntryRecord::from_bytes(value.value()) {
                Ok(record) => entries.push(StoredEntry {
                    id: EntryId(key.value()),
                    entry: LogEntry::from(record),
                }),
                Err(e) => {
                    warn!(id = key.value(), error = %e, "Skipping undecodable log entry");
                }
            }
        }
        Ok(entries)
    }

    /// Highest id stored, if any.
    pub(crate) fn last_id(&self) -> StoreResult<Option<EntryId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES_TABLE)?;
        let last = table.last()?.map(|(key, _)| EntryId(key.value()));
        Ok(last)
    }

    /// Apply a batch of changes in one write transaction.
    pub(crate) fn write_changes(&self, changes: &[Change]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENTRIES_TABLE)?;
            for change in changes {
                match change {
                    Change::Insert(stored) => {
                        let data = EntryRecord::from(&stored.entry)
                            .to_bytes()
                            .map_err(|e| StoreError::Serialization(e.to_string()))?;
                        table.insert(stored.id.0, data.as_slice())?;
                    }
                    Change::Delete(id) => {
                        table.remove(id.0)?;
                    }
                }
            }
        }
        write_txn.commit()?;
        debug!(changes = changes.len(), "Wrote batch to disk");
        Ok(())
    }

    /// Close the database and remove its files.
    pub(crate) fn destroy(self) -> StoreResult<()> {
        let Coordinator { db, backing, .. } = self;
        drop(db);

        match backing {
            Backing::File {
                directory,
                file_name,
            } => remove_store_files(&directory, &file_name),
            Backing::Memory => Ok(()),
        }
    }
}

/// One schema step, `from` -> `from + 1`.
fn migrate_step(from: u64) {
    match from {
        // v2 added `message2`; v1 rows decode with it defaulted to None.
        1 => debug!("Schema 1 -> 2: message2 defaults to empty"),
        _ => debug!(from, "No data changes for schema step"),
    }
}

/// Remove the primary store file, then any sibling whose name starts with it
/// (lock, journal or tombstone files).
pub(crate) fn remove_store_files(directory: &Path, file_name: &str) -> StoreResult<()> {
    let primary = directory.join(file_name);
    match fs::remove_file(&primary) {
        Ok(()) => debug!(path = %primary.display(), "Removed store file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(StoreError::FileRemovalFailure {
                path: primary,
                source,
            })
        }
    }

    let listing = match fs::read_dir(directory) {
        Ok(listing) => listing,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(StoreError::FileRemovalFailure {
                path: directory.to_path_buf(),
                source,
            })
        }
    };

    for item in listing {
        let item = item.map_err(|source| StoreError::FileRemovalFailure {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = item.path();
        let matches = item
            .file_name()
            .to_str()
            .map(|name| name.starts_with(file_name))
            .unwrap_or(false);
        if matches && path.is_file() {
            fs::remove_file(&path)
                .map_err(|source| StoreError::FileRemovalFailure { path: path.clone(), source })?;
            debug!(path = %path.display(), "Removed auxiliary store file");
        }
    }
    Ok(())
}
