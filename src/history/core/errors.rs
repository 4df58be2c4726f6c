//! Error types for the conversation-history subsystem.

use thiserror::Error;

use crate::history::core::ids::{ConversationId, OwnerIdError};

/// Conversation-history error type.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Malformed caller input (empty owner, empty text, unknown sender).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Referenced conversation does not exist or was deleted.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// Stored row that cannot be decoded back into a record.
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),
    /// `SQLite` storage error (sync).
    #[error("storage unavailable: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("storage unavailable: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
}

impl From<OwnerIdError> for HistoryError {
    fn from(err: OwnerIdError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl HistoryError {
    /// Whether this error belongs to the storage-unavailable class
    /// (backing medium unreachable; retry policy is the caller's concern).
    #[must_use]
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::Sqlite(_) | Self::TokioSqlite(_))
    }
}

/// Convenience result alias for history operations.
pub type HistoryResult<T> = Result<T, HistoryError>;
