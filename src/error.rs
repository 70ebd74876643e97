use serde::Serialize;
use thiserror::Error;

/// Failures raised while resolving, coercing, or reconciling a row set.
///
/// None of these escape the engine entry points: they are folded into a
/// failure [`Outcome`](crate::outcome::Outcome) with a readable message.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Table '{name}' does not exist or is not listed in the catalog")]
    UnknownTable { name: String },

    #[error("Schema mismatch for table '{table}': {detail}")]
    SchemaMismatch { table: String, detail: String },

    #[error("Only duplicate identities detected for table '{table}'")]
    DuplicateIdentity { table: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl IngestError {
    pub fn unknown_table(name: impl Into<String>) -> Self {
        IngestError::UnknownTable { name: name.into() }
    }

    pub fn schema_mismatch(table: impl Into<String>, detail: impl Into<String>) -> Self {
        IngestError::SchemaMismatch {
            table: table.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::UnknownTable { .. } => ErrorKind::UnknownTable,
            IngestError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            IngestError::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
            IngestError::Storage(_) => ErrorKind::StorageError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownTable,
    SchemaMismatch,
    DuplicateIdentity,
    StorageError,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::UnknownTable => 404,
            ErrorKind::SchemaMismatch => 422,
            ErrorKind::DuplicateIdentity => 409,
            ErrorKind::StorageError => 500,
        }
    }
}
