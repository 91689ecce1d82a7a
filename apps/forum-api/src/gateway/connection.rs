//! Per-connection identity, mailbox access and lifecycle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use forum_common::id::prefix;
use forum_common::PrefixedId;
use tokio::sync::{mpsc, watch};

use super::events::ChatMessage;
use super::hub::{ConnectionHub, Mailbox};

/// Lifecycle of a socket connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Active = 2,
    Unregistering = 3,
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Active,
            3 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

/// State shared by the two pumps of one socket.
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub id: String,
    /// Authenticated owner. Fixed for the life of the connection.
    pub user_id: i64,
    /// Weak handle to our own mailbox for local replies. It does not keep
    /// the mailbox open once the hub lets go of it.
    mailbox: mpsc::WeakSender<Arc<ChatMessage>>,
    /// Errors out once the hub has dropped our mailbox.
    detached: watch::Receiver<()>,
    state: AtomicU8,
}

impl PrefixedId for Connection {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl Connection {
    /// Create a connection with a bounded mailbox of `capacity` messages.
    ///
    /// Returns the connection, the strong mailbox handle (to be handed to
    /// the hub) and the receiving end for the outbound pump.
    pub fn open(
        user_id: i64,
        capacity: usize,
    ) -> (Self, Mailbox, mpsc::Receiver<Arc<ChatMessage>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let weak = tx.downgrade();
        let (mailbox, detached) = Mailbox::new(tx);
        let conn = Self {
            id: Self::generate(),
            user_id,
            mailbox: weak,
            detached,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
        };
        (conn, mailbox, rx)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Hand the mailbox to the hub and move to `Registered`.
    pub fn register(&self, hub: &ConnectionHub, mailbox: Mailbox) {
        hub.register(self.user_id, &self.id, mailbox);
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Registered as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Record that the connection has started exchanging frames.
    pub fn mark_active(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Registered as u8,
            ConnectionState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Resolves once the hub no longer holds our mailbox, whether through
    /// unregistration or eviction of a slow consumer.
    pub async fn detached(&self) {
        let mut detached = self.detached.clone();
        // Nothing is ever sent; the only change is the sender going away.
        while detached.changed().await.is_ok() {}
    }

    /// Queue a locally originated message (e.g. a rejection notice) into our
    /// own mailbox without blocking. Returns `false` if the mailbox is closed
    /// or full.
    pub fn reply(&self, message: ChatMessage) -> bool {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return false;
        };
        match mailbox.try_send(Arc::new(message)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection_id = %self.id, error = %e, "dropped local reply");
                false
            }
        }
    }

    /// Unregister from the hub and move to `Closed`.
    ///
    /// Both pumps call this on exit. Only the first call does anything and
    /// returns `true`.
    pub fn shutdown(&self, hub: &ConnectionHub) -> bool {
        let claimed = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s < ConnectionState::Unregistering as u8)
                    .then_some(ConnectionState::Unregistering as u8)
            })
            .is_ok();
        if !claimed {
            return false;
        }

        hub.unregister(self.user_id, &self.id);
        self.state.store(ConnectionState::Closed as u8, Ordering::Release);

        tracing::info!(connection_id = %self.id, user_id = self.user_id, "connection unregistered");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, _rx) = Connection::open(1, 4);
        assert!(conn.id.starts_with("conn_"));
        assert_eq!(conn.state(), ConnectionState::Connecting);

        conn.register(&hub, mailbox);
        assert_eq!(conn.state(), ConnectionState::Registered);
        assert!(hub.is_online(1));

        conn.mark_active();
        conn.mark_active();
        assert_eq!(conn.state(), ConnectionState::Active);

        assert!(conn.shutdown(&hub));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!hub.is_online(1));
    }

    #[test]
    fn shutdown_runs_once() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, _rx) = Connection::open(1, 4);
        conn.register(&hub, mailbox);

        assert!(conn.shutdown(&hub));
        assert!(!conn.shutdown(&hub));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn shutdown_keeps_sibling_connections() {
        let hub = ConnectionHub::new();
        let (a, mailbox_a, _rx_a) = Connection::open(1, 4);
        let (b, mailbox_b, _rx_b) = Connection::open(1, 4);
        a.register(&hub, mailbox_a);
        b.register(&hub, mailbox_b);

        a.shutdown(&hub);
        assert!(hub.is_online(1));
        assert_eq!(hub.connection_count(1), 1);
    }

    #[test]
    fn reply_lands_in_own_mailbox() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, mut rx) = Connection::open(9, 4);
        conn.register(&hub, mailbox);

        assert!(conn.reply(ChatMessage::system(9, "nope")));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.content, "nope");
    }

    #[test]
    fn shutdown_closes_mailbox_even_after_replies() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, mut rx) = Connection::open(9, 4);
        conn.register(&hub, mailbox);
        conn.reply(ChatMessage::system(9, "one"));

        conn.shutdown(&hub);
        assert!(!conn.reply(ChatMessage::system(9, "two")));

        assert_eq!(rx.try_recv().unwrap().content, "one");
        assert!(rx.try_recv().is_err());
        assert!(rx.is_closed());
    }

    #[tokio::test]
    async fn eviction_resolves_detached() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, _rx) = Connection::open(3, 1);
        conn.register(&hub, mailbox);

        hub.broadcast(ChatMessage::system(3, "one"));
        hub.broadcast(ChatMessage::system(3, "two"));
        assert!(!hub.is_online(3));

        tokio::time::timeout(std::time::Duration::from_secs(1), conn.detached())
            .await
            .expect("detached after eviction");
        // The evicted connection can no longer queue replies either.
        assert!(!conn.reply(ChatMessage::system(3, "late")));
    }

    #[tokio::test]
    async fn detached_stays_pending_while_registered() {
        let hub = ConnectionHub::new();
        let (conn, mailbox, _rx) = Connection::open(3, 4);
        conn.register(&hub, mailbox);

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), conn.detached()).await;
        assert!(waited.is_err());

        conn.shutdown(&hub);
        tokio::time::timeout(std::time::Duration::from_secs(1), conn.detached())
            .await
            .expect("detached after shutdown");
    }
}
