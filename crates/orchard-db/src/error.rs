use thiserror::Error;

/// Errors surfaced by the repositories.
///
/// A lookup that matches nothing for the given owner is not an error: the
/// `find_*` methods return `Ok(None)`. `NotFound` is reserved for writes that
/// target a row which does not exist for that owner.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("{entity} already exists: {detail}")]
    AlreadyExists { entity: &'static str, detail: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("file does not exist: {0}")]
    FileMissing(String),

    #[error("failed to {op}: {source}")]
    Query {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Attach the failed operation to a raw rusqlite error.
pub(crate) trait QueryContext<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> QueryContext<T> for std::result::Result<T, rusqlite::Error> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| StoreError::Query { op, source })
    }
}

/// Map a UNIQUE violation to `AlreadyExists`, everything else to `Query`.
pub(crate) fn map_unique(
    err: rusqlite::Error,
    entity: &'static str,
    op: &'static str,
) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(sqlite_err, msg)
            if sqlite_err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::AlreadyExists {
                entity,
                detail: msg.clone().unwrap_or_else(|| "unique constraint".to_string()),
            }
        }
        _ => StoreError::Query { op, source: err },
    }
}
