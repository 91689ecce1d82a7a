//! Read access to registered users. Registration itself lives elsewhere.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use parking_lot::RwLock;

use crate::db::pool::DbPool;
use crate::db::schema::users;
use crate::db::StoreError;
use crate::models::user::{UserRecord, UserSummary};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by username, falling back to email.
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, StoreError>;

    /// All registered users, ordered by id.
    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgUserDirectory {
    pool: DbPool,
}

impl PgUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.pool.get().await?;

        let by_username: Option<UserRecord> = diesel_async::RunQueryDsl::get_result(
            users::table
                .filter(users::username.eq(identifier))
                .select(UserRecord::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        if by_username.is_some() {
            return Ok(by_username);
        }

        let by_email: Option<UserRecord> = diesel_async::RunQueryDsl::get_result(
            users::table
                .filter(users::email.eq(identifier))
                .select(UserRecord::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(by_email)
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<UserSummary> = diesel_async::RunQueryDsl::load(
            users::table
                .order(users::id.asc())
                .select(UserSummary::as_select()),
            &mut conn,
        )
        .await?;

        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests / local runs)
// ---------------------------------------------------------------------------

pub struct MemoryUserDirectory {
    users: RwLock<Vec<UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(Vec::new()),
        }
    }

    /// Add a user with an already-hashed password. Returns the assigned id.
    pub fn insert(&self, username: &str, email: &str, password_hash: &str) -> i64 {
        let mut users = self.users.write();
        let id = users.last().map_or(1, |u| u.id + 1);
        users.push(UserRecord {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        });
        id
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_login(&self, identifier: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read();
        let found = users
            .iter()
            .find(|u| u.username == identifier)
            .or_else(|| users.iter().find(|u| u.email == identifier));
        Ok(found.cloned())
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, StoreError> {
        Ok(self
            .users
            .read()
            .iter()
            .map(|u| UserSummary {
                id: u.id,
                username: u.username.clone(),
            })
            .collect())
    }
}
