//! Configuration for the conversation-history subsystem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::history::core::errors::{HistoryError, HistoryResult};

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path (`:memory:` is accepted for tests).
    pub sqlite_path: PathBuf,
    /// Conversation table name.
    pub conversation_table: String,
    /// Message table name.
    pub message_table: String,
    /// Title used when a caller supplies an empty one.
    pub default_title: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("history.sqlite"),
            conversation_table: "conversations".to_string(),
            message_table: "conversation_messages".to_string(),
            default_title: "New conversation".to_string(),
        }
    }
}

impl StorageConfig {
    /// Validate configuration invariants.
    ///
    /// Table names are interpolated into SQL statements and are restricted
    /// to `[A-Za-z0-9_]`.
    ///
    /// # Errors
    /// Returns an error if any values are empty or invalid.
    pub fn validate(&self) -> HistoryResult<()> {
        for (field, name) in [
            ("conversation_table", &self.conversation_table),
            ("message_table", &self.message_table),
        ] {
            if name.is_empty() {
                return Err(HistoryError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
            if !name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
            {
                return Err(HistoryError::InvalidConfig(format!(
                    "{field} must match [A-Za-z0-9_]: got {name:?}"
                )));
            }
        }

        if self.conversation_table == self.message_table {
            return Err(HistoryError::InvalidConfig(
                "conversation_table and message_table must differ".to_string(),
            ));
        }

        if self.default_title.trim().is_empty() {
            return Err(HistoryError::InvalidConfig(
                "default_title must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
