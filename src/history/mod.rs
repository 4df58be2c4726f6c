//! Conversation-history subsystem.
//!
//! This module persists ordered message threads per user, organized into:
//! - `core`: Configuration, errors, and identifier types
//! - `conversation`: Sender, message, and conversation aggregate models
//! - `store`: The `ConversationStore` contract and its `SQLite` backend
//!
//! The store is the sole writer of persisted state; an external API layer
//! maps transport requests onto its operations and supplies the owner id.

pub mod conversation;
pub mod core;
pub mod store;

// Re-export commonly used types for convenience
pub use conversation::{Conversation, ConversationSummary, Message, Sender};
pub use self::core::{
    ConversationId, HistoryError, HistoryResult, OwnerId, OwnerIdError, StorageConfig,
};
pub use store::{ConversationStore, SqliteConversationStore, StoreFuture};

/// Initialize tracing with a basic subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}
