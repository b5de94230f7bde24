//! Error types for persistlog

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for store and logger operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// No model definition with this name exists in the bundle
    #[error("Unable to find object model named {name}")]
    InvalidModelPath {
        /// Model name that was looked up
        name: String,
    },

    /// The backing file could not be opened or migrated.
    ///
    /// The store files have already been removed when this is returned.
    #[error("Failed to open store at {}: {source}", path.display())]
    StoreOpenFailure {
        /// Path of the primary store file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A write was attempted after the backing store was destroyed
    #[error("The backing store for this stack has been deleted")]
    DeletedStore,

    /// Query execution failed during a read or delete
    #[error("Fetch failed: {0}")]
    FetchFailure(String),

    /// A store file could not be removed during destroy
    #[error("Unable to remove {}: {source}", path.display())]
    FileRemovalFailure {
        /// File that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization of a record
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialized queue stopped accepting work
    #[error("The {0} queue is no longer running")]
    QueueClosed(&'static str),

    /// A context was committed to a store that did not create it
    #[error("Context belongs to a different store")]
    ForeignContext,

    /// A blocking wait was issued from inside the queue it waits on
    #[error("Cannot wait on the {0} queue from within it")]
    ReentrantWait(&'static str),
}

impl StoreError {
    /// True for the error every write returns once the store is destroyed.
    pub fn is_deleted_store(&self) -> bool {
        matches!(self, StoreError::DeletedStore)
    }
}

/// Result type alias using StoreError
pub type StoreResult<T> = Result<T, StoreError>;
