//! Durable chat message storage: the port the gateway persists through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use parking_lot::Mutex;

use crate::db::pool::DbPool;
use crate::db::schema::messages;
use crate::db::StoreError;
use crate::gateway::events::{ChatMessage, NewChatMessage, SavedMessage};
use crate::models::message::{MessageRow, NewMessageRow};

/// Append-only chat message store.
///
/// Backed by PostgreSQL in production and an in-memory list in tests.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return the id and timestamp it was assigned.
    async fn save(&self, message: &NewChatMessage) -> Result<SavedMessage, StoreError>;

    /// Messages exchanged between `user` and `peer` in either direction,
    /// newest first.
    async fn history(
        &self,
        user: i64,
        peer: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    /// Timestamp of the newest message exchanged between `user` and `peer`.
    async fn last_message_at(
        &self,
        user: i64,
        peer: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgMessageStore {
    pool: DbPool,
}

impl PgMessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn save(&self, message: &NewChatMessage) -> Result<SavedMessage, StoreError> {
        let mut conn = self.pool.get().await?;

        let row: MessageRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(NewMessageRow {
                    sender_id: message.sender_id,
                    receiver_id: message.receiver_id,
                    content: &message.content,
                })
                .returning(MessageRow::as_returning()),
            &mut conn,
        )
        .await?;

        tracing::debug!(message_id = row.id, created_at = %row.created_at, "message saved");

        Ok(SavedMessage {
            id: row.id,
            created_at: row.created_at,
        })
    }

    async fn history(
        &self,
        user: i64,
        peer: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<MessageRow> = diesel_async::RunQueryDsl::load(
            messages::table
                .filter(
                    messages::sender_id
                        .eq(user)
                        .and(messages::receiver_id.eq(peer))
                        .or(messages::sender_id.eq(peer).and(messages::receiver_id.eq(user))),
                )
                .order((messages::created_at.desc(), messages::id.desc()))
                .limit(limit)
                .offset(offset)
                .select(MessageRow::as_select()),
            &mut conn,
        )
        .await?;

        Ok(rows.into_iter().map(ChatMessage::from).collect())
    }

    async fn last_message_at(
        &self,
        user: i64,
        peer: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let mut conn = self.pool.get().await?;

        let latest: Option<DateTime<Utc>> = diesel_async::RunQueryDsl::get_result(
            messages::table
                .filter(
                    messages::sender_id
                        .eq(user)
                        .and(messages::receiver_id.eq(peer))
                        .or(messages::sender_id.eq(peer).and(messages::receiver_id.eq(user))),
                )
                .select(diesel::dsl::max(messages::created_at)),
            &mut conn,
        )
        .await?;

        Ok(latest)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local runs)
// ---------------------------------------------------------------------------

pub struct MemoryMessageStore {
    inner: Mutex<MemoryLog>,
}

struct MemoryLog {
    next_id: i64,
    rows: Vec<ChatMessage>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryLog {
                next_id: 1,
                rows: Vec::new(),
            }),
        }
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_between(msg: &ChatMessage, user: i64, peer: i64) -> bool {
    (msg.sender_id == user && msg.receiver_id == peer)
        || (msg.sender_id == peer && msg.receiver_id == user)
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn save(&self, message: &NewChatMessage) -> Result<SavedMessage, StoreError> {
        let mut log = self.inner.lock();
        let saved = SavedMessage {
            id: log.next_id,
            created_at: Utc::now(),
        };
        log.next_id += 1;
        log.rows.push(ChatMessage::persisted(message.clone(), saved));
        Ok(saved)
    }

    async fn history(
        &self,
        user: i64,
        peer: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let log = self.inner.lock();
        // Ids are assigned in insertion order, so reverse order is newest first.
        Ok(log
            .rows
            .iter()
            .rev()
            .filter(|m| is_between(m, user, peer))
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn last_message_at(
        &self,
        user: i64,
        peer: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let log = self.inner.lock();
        Ok(log
            .rows
            .iter()
            .rev()
            .find(|m| is_between(m, user, peer))
            .map(|m| m.created_at))
    }
}
