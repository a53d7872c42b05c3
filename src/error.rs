use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("index directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote engine rejected request ({status}, {code}): {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    #[error("remote task {task} did not succeed: {message}")]
    RemoteTask { task: u64, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("search indexer is not initialized")]
    NotInitialized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{operation} failed for {subject}: {source}")]
    Backend {
        operation: &'static str,
        subject: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an engine error with the operation and the document or query it
    /// was about.
    pub fn backend(
        operation: &'static str,
        subject: impl Into<String>,
        source: Error,
    ) -> Self {
        Self::Backend {
            operation,
            subject: subject.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized)
    }
}
