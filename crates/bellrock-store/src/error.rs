use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    Duplicate,

    #[error("A user cannot be their own peer")]
    SelfEdge,

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] bellrock_shared::CryptoError),

    #[error("Location has no coarse coordinates")]
    UnresolvedLocation,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Collapse SQLite uniqueness violations into [`StoreError::Duplicate`].
pub(crate) fn map_constraint(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate
        }
        other => StoreError::Sqlite(other),
    }
}
