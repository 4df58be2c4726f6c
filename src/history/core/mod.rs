//! Core types for the conversation-history subsystem.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::StorageConfig;
pub use errors::{HistoryError, HistoryResult};
pub use ids::{ConversationId, OwnerId, OwnerIdError};
