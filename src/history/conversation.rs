//! Conversation aggregate and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::history::core::ids::{ConversationId, OwnerId};

/// Sender of a message turn.
///
/// Closed set: callers match exhaustively instead of comparing strings.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sender {
    /// The user who owns the conversation.
    User,
    /// The assistant replying to the user.
    Assistant,
}

impl Sender {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USER" => Ok(Self::User),
            "ASSISTANT" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// One immutable turn within a conversation.
///
/// Messages are never edited in place; the store only appends them, and the
/// timestamp is store-assigned so the sequence stays non-decreasing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the turn.
    pub sender: Sender,
    /// Text content of the turn.
    pub text: String,
    /// Store-assigned time the message was recorded.
    pub timestamp: DateTime<Utc>,
}

/// A conversation thread owned by one user.
///
/// The aggregate root: messages belong exclusively to their conversation
/// and are persisted with it as one consistency unit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Store-assigned identifier, stable for the object's lifetime.
    pub id: ConversationId,
    /// Owning user; never changes after creation.
    pub owner_id: OwnerId,
    /// Mutable short label.
    pub title: String,
    /// Messages in insertion order, append-only.
    pub messages: Vec<Message>,
    /// Set once at creation.
    pub created_at: DateTime<Utc>,
    /// Bumped on every successful append or metadata change.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Number of messages in the thread.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The most recent message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// Listing shape for a conversation: metadata only, no message bodies.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Owning user.
    pub owner_id: OwnerId,
    /// Current title.
    pub title: String,
    /// Number of messages in the thread.
    pub message_count: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub updated_at: DateTime<Utc>,
}
