//! Durable conversation-history storage backed by `SQLite`.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(unsafe_code)] // Le code unsafe est interdit
#![deny(missing_docs)] // Toute fonction, struct, enum ou module public doit être documenté
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![forbid(unsafe_op_in_unsafe_fn)]
// Clippy pour stricte discipline
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)] // Interdit unwrap()
#![deny(clippy::expect_used)] // Interdit expect()
#![deny(clippy::panic)] // Interdit panic!()
#![deny(clippy::print_stdout)] // Interdit println!() en production
#![deny(clippy::unimplemented)] // Interdit les fonctions non implémentées

/// Conversation-history components (`SQLite` persistence, models, errors).
pub mod history;

pub use history::{
    Conversation, ConversationId, ConversationStore, ConversationSummary, HistoryError,
    HistoryResult, Message, OwnerId, OwnerIdError, Sender, SqliteConversationStore, StorageConfig,
    StoreFuture, init_tracing,
};
