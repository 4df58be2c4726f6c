//! Conversation store contract and its `SQLite` backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::history::conversation::{Conversation, ConversationSummary, Message, Sender};
use crate::history::core::config::StorageConfig;
use crate::history::core::errors::{HistoryError, HistoryResult};
use crate::history::core::ids::{ConversationId, OwnerId};

/// Boxed future type for conversation store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Conversation store trait: sole authority for persisting and retrieving
/// conversation aggregates.
///
/// Append is the only mutation on message history; no edit or reorder
/// operation exists.
pub trait ConversationStore: Send + Sync {
    /// Create an empty conversation for an owner.
    ///
    /// An empty or whitespace title is replaced by the configured
    /// placeholder. The returned aggregate has `created_at == updated_at`.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn create(&self, owner: OwnerId, title: String)
    -> StoreFuture<'_, HistoryResult<Conversation>>;

    /// Append one message to a conversation.
    ///
    /// The store assigns the timestamp; within a conversation it never
    /// decreases, even when the wall clock does. The message insert and the
    /// `updated_at` bump commit in one transaction.
    ///
    /// # Errors
    /// Fails with [`HistoryError::InvalidArgument`] for empty text,
    /// [`HistoryError::NotFound`] for a missing conversation, or a storage
    /// error.
    fn append_message(
        &self,
        id: ConversationId,
        sender: Sender,
        text: String,
    ) -> StoreFuture<'_, HistoryResult<Message>>;

    /// Load the full aggregate, messages in insertion order.
    ///
    /// # Errors
    /// Fails with [`HistoryError::NotFound`] when absent, or a storage error.
    fn get(&self, id: ConversationId) -> StoreFuture<'_, HistoryResult<Conversation>>;

    /// List an owner's conversations, most recently active first.
    ///
    /// Summaries omit message bodies. An unknown owner yields an empty vec,
    /// not an error.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_by_owner(
        &self,
        owner: OwnerId,
    ) -> StoreFuture<'_, HistoryResult<Vec<ConversationSummary>>>;

    /// Set the title and bump `updated_at`.
    ///
    /// # Errors
    /// Fails with [`HistoryError::NotFound`] when absent, or a storage error.
    fn update_title(
        &self,
        id: ConversationId,
        title: String,
    ) -> StoreFuture<'_, HistoryResult<()>>;

    /// Remove the conversation and all its messages atomically.
    ///
    /// # Errors
    /// Fails with [`HistoryError::NotFound`] when absent (including a second
    /// delete of the same id), or a storage error.
    fn delete(&self, id: ConversationId) -> StoreFuture<'_, HistoryResult<()>>;
}

fn datetime_from_millis(ms: i64) -> HistoryResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| HistoryError::InvalidRecord(format!("invalid timestamp: {ms}")))
}

/// `SQLite` implementation of the conversation store.
///
/// All durable state lives in the database; no conversation content is
/// cached in memory. Appends on one conversation id are serialized through
/// a per-id mutex.
pub struct SqliteConversationStore {
    conn: Connection,
    conversations: String,
    messages: String,
    default_title: String,
    locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl SqliteConversationStore {
    /// Initialize the conversation store.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn new(config: &StorageConfig) -> HistoryResult<Self> {
        config.validate()?;

        let conn = Connection::open(&config.sqlite_path).await?;
        let conversations = config.conversation_table.clone();
        let messages = config.message_table.clone();
        let ctable = conversations.clone();
        let mtable = messages.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {ctable} (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{ctable}_owner_updated
                    ON {ctable} (owner_id, updated_at);
                CREATE TABLE IF NOT EXISTS {mtable} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    sender TEXT NOT NULL,
                    text TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{mtable}_thread
                    ON {mtable} (conversation_id, id);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            conversations,
            messages,
            default_title: config.default_title.clone(),
            locks: DashMap::new(),
        })
    }

    fn effective_title(&self, title: String) -> String {
        if title.trim().is_empty() {
            self.default_title.clone()
        } else {
            title
        }
    }

    fn append_lock(&self, id: ConversationId) -> Arc<Mutex<()>> {
        // Clone out of the entry so the dashmap guard never crosses an await
        let entry = self.locks.entry(id).or_default();
        Arc::clone(entry.value())
    }
}

impl ConversationStore for SqliteConversationStore {
    fn create(
        &self,
        owner: OwnerId,
        title: String,
    ) -> StoreFuture<'_, HistoryResult<Conversation>> {
        Box::pin(async move {
            let id = ConversationId::new();
            let title = self.effective_title(title);
            let now_ms = Utc::now().timestamp_millis();

            let table = self.conversations.clone();
            let owner_param = owner.clone();
            let title_param = title.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (id, owner_id, title, created_at, updated_at)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![id, owner_param, title_param, now_ms, now_ms],
                    )?;
                    Ok(())
                })
                .await?;

            debug!(%id, owner = %owner, "created conversation");

            // Millisecond precision so the returned aggregate matches a re-read
            let now = datetime_from_millis(now_ms)?;
            Ok(Conversation {
                id,
                owner_id: owner,
                title,
                messages: Vec::new(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    fn append_message(
        &self,
        id: ConversationId,
        sender: Sender,
        text: String,
    ) -> StoreFuture<'_, HistoryResult<Message>> {
        Box::pin(async move {
            if text.trim().is_empty() {
                return Err(HistoryError::InvalidArgument(
                    "message text must not be empty".to_string(),
                ));
            }

            let lock = self.append_lock(id);
            let _guard = lock.lock().await;

            let ctable = self.conversations.clone();
            let mtable = self.messages.clone();
            let text_param = text.clone();
            let ts = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let exists: Option<i64> = tx
                        .query_row(
                            &format!("SELECT updated_at FROM {ctable} WHERE id = ?1"),
                            rusqlite::params![id],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if exists.is_none() {
                        return Ok(None);
                    }

                    let last_ts: Option<i64> = tx.query_row(
                        &format!("SELECT MAX(ts) FROM {mtable} WHERE conversation_id = ?1"),
                        rusqlite::params![id],
                        |row| row.get(0),
                    )?;
                    let now = Utc::now().timestamp_millis();
                    // Non-monotonic clock reading: advance past the prior message
                    let ts = match last_ts {
                        Some(prev) if now < prev => prev + 1,
                        _ => now,
                    };

                    tx.execute(
                        &format!(
                            "INSERT INTO {mtable} (conversation_id, ts, sender, text)
                             VALUES (?1, ?2, ?3, ?4)"
                        ),
                        rusqlite::params![id, ts, sender.as_str(), text_param],
                    )?;
                    tx.execute(
                        &format!("UPDATE {ctable} SET updated_at = ?2 WHERE id = ?1"),
                        rusqlite::params![id, ts],
                    )?;
                    tx.commit()?;
                    Ok(Some(ts))
                })
                .await?;

            let Some(ts) = ts else {
                // No conversation means no ordering to protect; drop the
                // lock entry so probing unknown ids cannot grow the map
                self.locks.remove(&id);
                return Err(HistoryError::NotFound(id));
            };

            debug!(%id, sender = %sender, ts, "appended message");
            Ok(Message {
                sender,
                text,
                timestamp: datetime_from_millis(ts)?,
            })
        })
    }

    fn get(&self, id: ConversationId) -> StoreFuture<'_, HistoryResult<Conversation>> {
        Box::pin(async move {
            let ctable = self.conversations.clone();
            let mtable = self.messages.clone();
            let loaded = self
                .conn
                .call(move |conn| {
                    let head: Option<(OwnerId, String, i64, i64)> = conn
                        .query_row(
                            &format!(
                                "SELECT owner_id, title, created_at, updated_at
                                 FROM {ctable} WHERE id = ?1"
                            ),
                            rusqlite::params![id],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                        )
                        .optional()?;
                    let Some(head) = head else {
                        return Ok(None);
                    };

                    let mut stmt = conn.prepare(&format!(
                        "SELECT sender, text, ts FROM {mtable}
                         WHERE conversation_id = ?1
                         ORDER BY id"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![id], |row| {
                            let sender: String = row.get(0)?;
                            let text: String = row.get(1)?;
                            let ts: i64 = row.get(2)?;
                            Ok((sender, text, ts))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(Some((head, rows)))
                })
                .await?;

            let Some(((owner_id, title, created_ms, updated_ms), rows)) = loaded else {
                return Err(HistoryError::NotFound(id));
            };

            let mut messages = Vec::with_capacity(rows.len());
            for (sender, text, ts) in rows {
                let sender = sender
                    .parse::<Sender>()
                    .map_err(|raw| HistoryError::InvalidRecord(format!("invalid sender: {raw}")))?;
                messages.push(Message {
                    sender,
                    text,
                    timestamp: datetime_from_millis(ts)?,
                });
            }

            Ok(Conversation {
                id,
                owner_id,
                title,
                messages,
                created_at: datetime_from_millis(created_ms)?,
                updated_at: datetime_from_millis(updated_ms)?,
            })
        })
    }

    fn list_by_owner(
        &self,
        owner: OwnerId,
    ) -> StoreFuture<'_, HistoryResult<Vec<ConversationSummary>>> {
        Box::pin(async move {
            let ctable = self.conversations.clone();
            let mtable = self.messages.clone();
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT c.id, c.owner_id, c.title, c.created_at, c.updated_at,
                                (SELECT COUNT(*) FROM {mtable} m WHERE m.conversation_id = c.id)
                         FROM {ctable} c
                         WHERE c.owner_id = ?1
                         ORDER BY c.updated_at DESC, c.created_at DESC"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![owner], |row| {
                            let id: ConversationId = row.get(0)?;
                            let owner_id: OwnerId = row.get(1)?;
                            let title: String = row.get(2)?;
                            let created_ms: i64 = row.get(3)?;
                            let updated_ms: i64 = row.get(4)?;
                            let count: i64 = row.get(5)?;
                            Ok((id, owner_id, title, created_ms, updated_ms, count))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut summaries = Vec::with_capacity(rows.len());
            for (id, owner_id, title, created_ms, updated_ms, count) in rows {
                let message_count = u64::try_from(count).map_err(|_| {
                    HistoryError::InvalidRecord("invalid message count".to_string())
                })?;
                summaries.push(ConversationSummary {
                    id,
                    owner_id,
                    title,
                    message_count,
                    created_at: datetime_from_millis(created_ms)?,
                    updated_at: datetime_from_millis(updated_ms)?,
                });
            }

            Ok(summaries)
        })
    }

    fn update_title(
        &self,
        id: ConversationId,
        title: String,
    ) -> StoreFuture<'_, HistoryResult<()>> {
        Box::pin(async move {
            let title = self.effective_title(title);
            let ctable = self.conversations.clone();
            let now_ms = Utc::now().timestamp_millis();
            let affected = self
                .conn
                .call(move |conn| {
                    let affected = conn.execute(
                        &format!("UPDATE {ctable} SET title = ?2, updated_at = ?3 WHERE id = ?1"),
                        rusqlite::params![id, title, now_ms],
                    )?;
                    Ok(affected)
                })
                .await?;

            if affected == 0 {
                return Err(HistoryError::NotFound(id));
            }
            Ok(())
        })
    }

    fn delete(&self, id: ConversationId) -> StoreFuture<'_, HistoryResult<()>> {
        Box::pin(async move {
            let ctable = self.conversations.clone();
            let mtable = self.messages.clone();
            let affected = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        &format!("DELETE FROM {mtable} WHERE conversation_id = ?1"),
                        rusqlite::params![id],
                    )?;
                    let affected = tx.execute(
                        &format!("DELETE FROM {ctable} WHERE id = ?1"),
                        rusqlite::params![id],
                    )?;
                    tx.commit()?;
                    Ok(affected)
                })
                .await?;

            if affected == 0 {
                return Err(HistoryError::NotFound(id));
            }

            self.locks.remove(&id);
            debug!(%id, "deleted conversation");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    async fn mem_store() -> SqliteConversationStore {
        let config = StorageConfig {
            sqlite_path: PathBuf::from(":memory:"),
            ..StorageConfig::default()
        };
        SqliteConversationStore::new(&config).await.unwrap()
    }

    fn owner(raw: &str) -> OwnerId {
        OwnerId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn test_create_starts_empty() {
        let store = mem_store().await;
        let conversation = store
            .create(owner("u1"), "Trip planning".to_string())
            .await
            .unwrap();

        assert!(conversation.messages.is_empty());
        assert_eq!(conversation.created_at, conversation.updated_at);
        assert_eq!(conversation.title, "Trip planning");

        let read_back = store.get(conversation.id).await.unwrap();
        assert_eq!(read_back, conversation);
    }

    #[tokio::test]
    async fn test_create_defaults_empty_title() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), "   ".to_string()).await.unwrap();
        assert_eq!(conversation.title, "New conversation");
    }

    #[tokio::test]
    async fn test_append_preserves_order_and_timestamps() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), String::new()).await.unwrap();

        for i in 0..5 {
            store
                .append_message(conversation.id, Sender::User, format!("turn {i}"))
                .await
                .unwrap();
        }

        let read_back = store.get(conversation.id).await.unwrap();
        let texts: Vec<&str> = read_back.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["turn 0", "turn 1", "turn 2", "turn 3", "turn 4"]);
        for pair in read_back.messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        let last = read_back.messages.last().unwrap();
        assert_eq!(read_back.updated_at, last.timestamp);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_text() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), String::new()).await.unwrap();

        for text in ["", "   "] {
            let err = store
                .append_message(conversation.id, Sender::User, text.to_string())
                .await
                .unwrap_err();
            assert!(matches!(err, HistoryError::InvalidArgument(_)));
        }

        let read_back = store.get(conversation.id).await.unwrap();
        assert!(read_back.messages.is_empty());
    }

    #[tokio::test]
    async fn test_append_on_missing_conversation_creates_nothing() {
        let store = mem_store().await;
        let id = ConversationId::new();

        let err = store
            .append_message(id, Sender::User, "hello".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(missing) if missing == id));

        let err = store.get(id).await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_to_unknown_ids_leaves_no_lock_entries() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), String::new()).await.unwrap();
        store
            .append_message(conversation.id, Sender::User, "hello".to_string())
            .await
            .unwrap();

        for _ in 0..100 {
            let err = store
                .append_message(ConversationId::new(), Sender::User, "anyone there?".to_string())
                .await
                .unwrap_err();
            assert!(matches!(err, HistoryError::NotFound(_)));
        }

        // Only the live conversation may keep a lock entry
        assert!(store.locks.len() <= 1);
        assert!(!store.locks.contains_key(&ConversationId::new()));
    }

    #[tokio::test]
    async fn test_list_by_owner_orders_by_activity() {
        let store = mem_store().await;
        let a = store.create(owner("u1"), "A".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.create(owner("u1"), "B".to_string()).await.unwrap();

        let listed = store.list_by_owner(owner("u1")).await.unwrap();
        let ids: Vec<ConversationId> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, [b.id, a.id]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .append_message(a.id, Sender::User, "ping".to_string())
            .await
            .unwrap();

        let listed = store.list_by_owner(owner("u1")).await.unwrap();
        let ids: Vec<ConversationId> = listed.iter().map(|s| s.id).collect();
        assert_eq!(ids, [a.id, b.id]);
        assert_eq!(listed[0].message_count, 1);
        assert_eq!(listed[1].message_count, 0);
    }

    #[tokio::test]
    async fn test_list_by_unknown_owner_is_empty() {
        let store = mem_store().await;
        store.create(owner("u1"), "A".to_string()).await.unwrap();

        let listed = store.list_by_owner(owner("someone-else")).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_update_title_bumps_updated_at() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), "Old".to_string()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .update_title(conversation.id, "New".to_string())
            .await
            .unwrap();

        let read_back = store.get(conversation.id).await.unwrap();
        assert_eq!(read_back.title, "New");
        assert!(read_back.updated_at > conversation.updated_at);
    }

    #[tokio::test]
    async fn test_update_title_on_missing_conversation() {
        let store = mem_store().await;
        let err = store
            .update_title(ConversationId::new(), "x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_then_get_fails_not_found() {
        let store = mem_store().await;
        let conversation = store.create(owner("u1"), String::new()).await.unwrap();
        store
            .append_message(conversation.id, Sender::User, "bye".to_string())
            .await
            .unwrap();

        store.delete(conversation.id).await.unwrap();

        let err = store.get(conversation.id).await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));

        // No silent success on double delete
        let err = store.delete(conversation.id).await.unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trip_planning_scenario() {
        let store = mem_store().await;
        let conversation = store
            .create(owner("u1"), "Trip planning".to_string())
            .await
            .unwrap();

        let m1 = store
            .append_message(conversation.id, Sender::User, "Where should I go?".to_string())
            .await
            .unwrap();
        let m2 = store
            .append_message(conversation.id, Sender::Assistant, "Try Lisbon.".to_string())
            .await
            .unwrap();

        let read_back = store.get(conversation.id).await.unwrap();
        assert_eq!(read_back.messages, [m1, m2]);

        store
            .update_title(conversation.id, "Lisbon trip".to_string())
            .await
            .unwrap();
        assert_eq!(store.get(conversation.id).await.unwrap().title, "Lisbon trip");
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_ordering_invariants() {
        let store = Arc::new(mem_store().await);
        let conversation = store.create(owner("u1"), String::new()).await.unwrap();

        let mut handles = Vec::new();
        for task in 0..4 {
            let store = Arc::clone(&store);
            let id = conversation.id;
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    store
                        .append_message(id, Sender::User, format!("task {task} turn {i}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let read_back = store.get(conversation.id).await.unwrap();
        assert_eq!(read_back.messages.len(), 20);
        for pair in read_back.messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }
}
