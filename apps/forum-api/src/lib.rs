pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::sessions::SessionStore;
use config::Config;
use db::{MessageStore, UserDirectory};
use gateway::hub::ConnectionHub;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub hub: Arc<ConnectionHub>,
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserDirectory>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Fresh state with an empty session store and hub over the given stores.
    pub fn new(
        config: Config,
        messages: Arc<dyn MessageStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionStore::new()),
            hub: Arc::new(ConnectionHub::new()),
            messages,
            users,
            config: Arc::new(config),
        }
    }
}
