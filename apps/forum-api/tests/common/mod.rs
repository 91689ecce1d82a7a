#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};

use forum_api::auth::password::hash_password;
use forum_api::config::Config;
use forum_api::db::{MemoryMessageStore, MemoryUserDirectory, MessageStore, StoreError};
use forum_api::gateway::events::{ChatMessage, NewChatMessage, SavedMessage};
use forum_api::AppState;

/// Password shared by every seeded user.
pub const PASSWORD: &str = "hunter22";

/// Ids of the users seeded into the in-memory directory.
pub struct Seeded {
    pub alice: i64,
    pub bob: i64,
    pub carol: i64,
}

/// Build a test AppState over in-memory stores with three registered users.
pub fn test_state() -> (AppState, Seeded, Arc<MemoryMessageStore>) {
    let messages = Arc::new(MemoryMessageStore::new());
    let (state, seeded) = test_state_with(Config::for_tests(), messages.clone());
    (state, seeded, messages)
}

/// Like [`test_state`], with a custom config and message store.
pub fn test_state_with(config: Config, messages: Arc<dyn MessageStore>) -> (AppState, Seeded) {
    let users = Arc::new(MemoryUserDirectory::new());
    let hash = hash_password(PASSWORD).expect("hash test password");
    let seeded = Seeded {
        alice: users.insert("alice", "alice@example.com", &hash),
        bob: users.insert("bob", "bob@example.com", &hash),
        carol: users.insert("carol", "carol@example.com", &hash),
    };

    (AppState::new(config, messages, users), seeded)
}

/// Build the full application router wired to the test state.
pub fn test_app() -> (Router, AppState, Seeded, Arc<MemoryMessageStore>) {
    let (state, seeded, messages) = test_state();
    let app = forum_api::routes::router().with_state(state.clone());
    (app, state, seeded, messages)
}

/// Log in through axum-test and return the session token.
pub async fn login(server: &axum_test::TestServer, username: &str) -> String {
    let resp = server
        .post("/api/login")
        .json(&serde_json::json!({ "username": username, "password": PASSWORD }))
        .await;
    resp.assert_status_ok();
    resp.cookie("session_id").value().to_string()
}

/// `Cookie` header value carrying a session token.
pub fn session_cookie(token: &str) -> http::HeaderValue {
    http::HeaderValue::from_str(&format!("session_id={token}")).expect("cookie header")
}

/// Start an actual TCP server for socket testing. The server runs in the
/// background until the test runtime shuts down.
pub async fn start_server() -> (SocketAddr, AppState, Seeded) {
    let (state, seeded, _) = test_state();
    let addr = serve(state.clone()).await;
    (addr, state, seeded)
}

/// Serve the full router for `state` on an ephemeral port.
pub async fn serve(state: AppState) -> SocketAddr {
    let app = forum_api::routes::router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Message store whose writes always fail. Reads return nothing.
pub struct FailingStore;

#[async_trait]
impl MessageStore for FailingStore {
    async fn save(&self, _message: &NewChatMessage) -> Result<SavedMessage, StoreError> {
        Err(StoreError::Unavailable("database is down".to_string()))
    }

    async fn history(
        &self,
        _user: i64,
        _peer: i64,
        _limit: i64,
        _offset: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(Vec::new())
    }

    async fn last_message_at(
        &self,
        _user: i64,
        _peer: i64,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(None)
    }
}
