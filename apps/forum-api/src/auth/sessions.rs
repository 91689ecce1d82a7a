//! Login sessions: one live token per user, resolvable in both directions.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::tokens;

struct SessionMaps {
    /// token → user
    by_token: HashMap<String, i64>,
    /// user → current token
    by_user: HashMap<i64, String>,
    /// Users flagged present at login. Informational only; the connection
    /// hub decides who is online.
    present: HashSet<i64>,
}

/// Process-local session registry.
///
/// A single mutex covers both maps and the presence flags so the two
/// directions are never observed out of step.
pub struct SessionStore {
    inner: Mutex<SessionMaps>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionMaps {
                by_token: HashMap::new(),
                by_user: HashMap::new(),
                present: HashSet::new(),
            }),
        }
    }

    /// Mint a new token for `user_id`, invalidating any token it held before.
    pub fn create_session(&self, user_id: i64) -> String {
        let token = tokens::generate_session_token();

        let mut maps = self.inner.lock();
        if let Some(old) = maps.by_user.insert(user_id, token.clone()) {
            maps.by_token.remove(&old);
            tracing::info!(user_id, "previous session superseded");
        }
        maps.by_token.insert(token.clone(), user_id);
        maps.present.insert(user_id);
        drop(maps);

        tracing::info!(user_id, "session created");
        token
    }

    /// Resolve a token to its user. A token only resolves while it is still
    /// the user's current one.
    pub fn lookup(&self, token: &str) -> Option<i64> {
        let maps = self.inner.lock();
        let user_id = *maps.by_token.get(token)?;
        match maps.by_user.get(&user_id) {
            Some(current) if current == token => Some(user_id),
            _ => None,
        }
    }

    /// Remove a session. Unknown tokens are ignored.
    pub fn destroy(&self, token: &str) {
        let mut maps = self.inner.lock();
        let Some(user_id) = maps.by_token.remove(token) else {
            return;
        };
        if maps.by_user.get(&user_id).is_some_and(|t| t == token) {
            maps.by_user.remove(&user_id);
        }
        maps.present.remove(&user_id);
        drop(maps);

        tracing::info!(user_id, "session destroyed");
    }

    /// Whether `user_id` logged in and has not logged out since.
    pub fn is_present(&self, user_id: i64) -> bool {
        self.inner.lock().present.contains(&user_id)
    }

    /// Number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.inner.lock().by_user.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
