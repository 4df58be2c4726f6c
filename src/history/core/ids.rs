//! Identifier types for the conversation-history subsystem.
//!
//! Conversation ids are assigned by the store and never by callers; owner
//! ids come from the external authentication collaborator and are validated
//! at the boundary.
//!
//! ## Cargo features used by this module
//! - `uuid_v7`: enables `UUIDv7` generation via `uuid/v7`.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
///
/// With feature `uuid_v7` enabled, this uses `Uuid::now_v7()`.
/// Otherwise it falls back to `Uuid::new_v4()`.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Identifier for a conversation aggregate.
///
/// Stable for the conversation's lifetime; generation is store-side only,
/// so callers cannot collide ids across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl Default for ConversationId {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationId {
    /// Create a new identifier.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(uuid_time_ordered())
    }

    /// Wrap an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Borrow the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConversationId {
    #[inline]
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<ConversationId> for Uuid {
    #[inline]
    fn from(value: ConversationId) -> Self {
        value.0
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ===== Owner IDs ============================================================

/// Errors returned when parsing/validating an [`OwnerId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerIdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
    /// Exceeds the maximum accepted length.
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length received.
        got: usize,
    },
    /// Contains a disallowed character.
    InvalidChar {
        /// The invalid character.
        ch: char,
        /// The index where it was found.
        index: usize,
    },
}

impl fmt::Display for OwnerIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "owner id must not be empty"),
            Self::TooLong { max, got } => write!(f, "owner id too long: got {got}, max {max}"),
            Self::InvalidChar { ch, index } => {
                write!(
                    f,
                    "owner id contains invalid character {ch:?} at index {index}"
                )
            }
        }
    }
}

impl std::error::Error for OwnerIdError {}

/// Identifier of the user who owns a conversation.
///
/// Opaque to this crate: the authentication layer decides its shape
/// (account id, subject claim, email-like handle). Validation here only
/// guarantees the id is usable as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    /// Hard ceiling to prevent pathological payloads.
    pub const MAX_LEN: usize = 128;

    /// Build a validated `OwnerId`.
    ///
    /// Rules:
    /// - Non-empty after trimming.
    /// - Max length limited.
    /// - Conservative ASCII set: `[A-Za-z0-9._:/+-@]`.
    ///
    /// # Errors
    /// Returns `OwnerIdError` if the input is empty, too long, or contains
    /// invalid characters.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, OwnerIdError> {
        let s = raw.as_ref().trim();

        if s.is_empty() {
            return Err(OwnerIdError::Empty);
        }
        if s.len() > Self::MAX_LEN {
            return Err(OwnerIdError::TooLong {
                max: Self::MAX_LEN,
                got: s.len(),
            });
        }

        for (i, ch) in s.chars().enumerate() {
            let ok =
                ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | ':' | '/' | '-' | '+' | '@');
            if !ok {
                return Err(OwnerIdError::InvalidChar { ch, index: i });
            }
        }

        Ok(Self(s.to_owned()))
    }

    /// Borrow as `&str`.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into `String`.
    #[inline]
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerId {
    type Err = OwnerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.into_string()
    }
}

impl TryFrom<String> for OwnerId {
    type Error = OwnerIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ===== Rusqlite integration ================================================

mod rusqlite_impl {
    use super::{ConversationId, OwnerId, OwnerIdError};
    use std::fmt;

    use rusqlite::types::{
        FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef,
    };

    #[derive(Debug)]
    struct InvalidUuidBlobLen {
        got: usize,
    }

    impl fmt::Display for InvalidUuidBlobLen {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "invalid UUID blob length: got {}, expected 16", self.got)
        }
    }

    impl std::error::Error for InvalidUuidBlobLen {}

    fn uuid_from_blob(b: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let bytes: [u8; 16] = b
            .try_into()
            .map_err(|_| FromSqlError::Other(Box::new(InvalidUuidBlobLen { got: b.len() })))?;
        Ok(uuid::Uuid::from_bytes(bytes))
    }

    fn uuid_from_text(t: &[u8]) -> FromSqlResult<uuid::Uuid> {
        let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
        uuid::Uuid::parse_str(s).map_err(|e| FromSqlError::Other(Box::new(e)))
    }

    impl ToSql for ConversationId {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            // Store UUIDs as TEXT for compatibility
            Ok(ToSqlOutput::Owned(Value::Text(self.0.to_string())))
        }
    }

    impl FromSql for ConversationId {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            match value {
                ValueRef::Blob(b) => uuid_from_blob(b).map(Self),
                ValueRef::Text(t) => uuid_from_text(t).map(Self),
                _ => Err(FromSqlError::InvalidType),
            }
        }
    }

    impl ToSql for OwnerId {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(ToSqlOutput::Owned(Value::Text(self.as_str().to_owned())))
        }
    }

    impl FromSql for OwnerId {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            match value {
                ValueRef::Text(t) => {
                    let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                    Self::new(s).map_err(|e| FromSqlError::Other(Box::new(e)))
                }
                ValueRef::Null => Err(FromSqlError::Other(Box::new(OwnerIdError::Empty))),
                _ => Err(FromSqlError::InvalidType),
            }
        }
    }
}
