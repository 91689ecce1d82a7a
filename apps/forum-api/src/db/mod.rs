pub mod messages;
pub mod pool;
pub mod schema;
pub mod users;

use thiserror::Error;

pub use messages::{MemoryMessageStore, MessageStore, PgMessageStore};
pub use users::{MemoryUserDirectory, PgUserDirectory, UserDirectory};

/// Failure reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
