//! Registry of live connections per user, and message fan-out.
//!
//! Every registration change and every broadcast runs under one mutex, so
//! presence transitions form a single linear history. The lock is never held
//! across I/O: delivery is a non-blocking `try_send` into each connection's
//! mailbox, and a full mailbox gets its connection evicted instead of
//! stalling everyone else.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use super::events::ChatMessage;

/// The hub's handle on one connection's bounded outbound queue.
///
/// The hub holds the only strong sender, so dropping the handle (unregister
/// or eviction) closes the queue. It also drops the `watch` sender, which
/// is how the connection's pumps learn they have been cut loose.
pub struct Mailbox {
    tx: mpsc::Sender<Arc<ChatMessage>>,
    _attached: watch::Sender<()>,
}

impl Mailbox {
    /// Wrap a queue sender. The returned receiver observes the hub letting
    /// go of the mailbox.
    pub fn new(tx: mpsc::Sender<Arc<ChatMessage>>) -> (Self, watch::Receiver<()>) {
        let (attached, detached) = watch::channel(());
        (
            Self {
                tx,
                _attached: attached,
            },
            detached,
        )
    }
}

impl From<mpsc::Sender<Arc<ChatMessage>>> for Mailbox {
    fn from(tx: mpsc::Sender<Arc<ChatMessage>>) -> Self {
        Self::new(tx).0
    }
}

/// user id → (connection id → mailbox). A user key exists only while its
/// inner map is non-empty.
type Registry = HashMap<i64, HashMap<String, Mailbox>>;

/// Outcome of a broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Mailboxes the message was queued into.
    pub delivered: usize,
    /// Connections dropped because their mailbox was full or gone.
    pub evicted: usize,
}

pub struct ConnectionHub {
    registry: Mutex<Registry>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Add a connection. Returns `true` if this brought the user online.
    pub fn register(
        &self,
        user_id: i64,
        connection_id: &str,
        mailbox: impl Into<Mailbox>,
    ) -> bool {
        let mailbox = mailbox.into();
        let mut registry = self.registry.lock();
        let conns = registry.entry(user_id).or_default();
        conns.insert(connection_id.to_string(), mailbox);
        let came_online = conns.len() == 1;
        drop(registry);

        if came_online {
            tracing::info!(user_id, "user online");
        }
        came_online
    }

    /// Remove a connection and close its mailbox. Returns `false` if the
    /// connection was not registered (already removed or evicted).
    pub fn unregister(&self, user_id: i64, connection_id: &str) -> bool {
        let mut registry = self.registry.lock();
        let Some(conns) = registry.get_mut(&user_id) else {
            return false;
        };
        let removed = conns.remove(connection_id).is_some();
        let went_offline = conns.is_empty();
        if went_offline {
            registry.remove(&user_id);
        }
        drop(registry);

        if went_offline {
            tracing::info!(user_id, "user offline");
        }
        removed
    }

    /// Deliver to every connection of the receiver and, unless the message
    /// is a typing indicator, every connection of the sender.
    pub fn broadcast(&self, message: ChatMessage) -> Delivery {
        let receiver_id = message.receiver_id;
        let sender_id = message.sender_id;
        let echo_to_sender = !message.kind.is_transient() && sender_id != receiver_id;
        let message = Arc::new(message);

        let mut delivery = Delivery::default();
        let mut registry = self.registry.lock();
        deliver(&mut registry, receiver_id, &message, &mut delivery);
        if echo_to_sender {
            deliver(&mut registry, sender_id, &message, &mut delivery);
        }
        delivery
    }

    /// Whether the user has at least one live connection.
    pub fn is_online(&self, user_id: i64) -> bool {
        self.registry.lock().contains_key(&user_id)
    }

    /// Ids of all users with a live connection, ascending.
    pub fn online_users(&self) -> Vec<i64> {
        let mut users: Vec<i64> = self.registry.lock().keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn connection_count(&self, user_id: i64) -> usize {
        self.registry.lock().get(&user_id).map_or(0, HashMap::len)
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(
    registry: &mut Registry,
    user_id: i64,
    message: &Arc<ChatMessage>,
    delivery: &mut Delivery,
) {
    let Some(conns) = registry.get_mut(&user_id) else {
        return;
    };

    conns.retain(|connection_id, mailbox| match mailbox.tx.try_send(Arc::clone(message)) {
        Ok(()) => {
            delivery.delivered += 1;
            true
        }
        Err(TrySendError::Full(_)) => {
            tracing::warn!(user_id, %connection_id, "mailbox full, evicting connection");
            delivery.evicted += 1;
            false
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(user_id, %connection_id, "mailbox closed, evicting connection");
            delivery.evicted += 1;
            false
        }
    });

    if conns.is_empty() {
        registry.remove(&user_id);
        tracing::info!(user_id, "user offline");
    }
}
