pub mod config;
pub mod covers;
pub mod engine;
pub mod events;
pub mod extract;
pub mod index;
pub mod scanner;
pub mod service;
pub mod store;

use std::path::PathBuf;

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

pub use config::{load_or_create_config, LibraryConfig};
pub use covers::{CoverKey, CoverRequest, CoverResolver, CoverStore};
pub use engine::{BatchState, IndexingEngine, Playlist, ScanSummary, Selection};
pub use events::{EntrySummary, EventSink, FieldChange, LibraryEvent};
pub use extract::{ExtractError, SongReader, TagReader};
pub use scanner::{ScanSource, Scanner};
pub use service::{LibraryHandle, LibraryService, ServiceOptions, ServiceStatus};
pub use store::{RedbSongStore, SongStore};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Root { path: PathBuf, reason: String },
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    ScanInProgress,
    ServiceStopped,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Root { path, reason } => {
                write!(f, "cannot scan {}: {}", path.display(), reason)
            }
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::ScanInProgress => write!(f, "a scan is already in progress"),
            LibraryError::ServiceStopped => write!(f, "library service is not running"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
