//! Inbound frame processing: decode, validate, persist, broadcast.

use crate::db::MessageStore;
use crate::error::ChatError;

use super::events::{ChatMessage, IncomingFrame, MessageKind, NewChatMessage, MAX_CONTENT_CHARS};
use super::hub::{ConnectionHub, Delivery};

/// Process one frame received from `sender_id`.
///
/// Rejections never reach the store or the hub; the caller turns the error
/// into a system message for the sender.
pub async fn handle_frame(
    hub: &ConnectionHub,
    store: &dyn MessageStore,
    sender_id: i64,
    payload: &[u8],
) -> Result<Delivery, ChatError> {
    let frame: IncomingFrame = serde_json::from_slice(payload)?;
    let draft = validate(sender_id, frame)?;

    if !hub.is_online(draft.receiver_id) {
        return Err(ChatError::RecipientUnavailable(draft.receiver_id));
    }

    let message = if draft.kind.is_transient() {
        ChatMessage::transient(draft)
    } else {
        let saved = store.save(&draft).await.map_err(ChatError::Persistence)?;
        ChatMessage::persisted(draft, saved)
    };

    Ok(hub.broadcast(message))
}

/// Check a decoded frame and stamp it with the authenticated sender.
pub fn validate(sender_id: i64, frame: IncomingFrame) -> Result<NewChatMessage, ChatError> {
    if frame.kind == MessageKind::System {
        return Err(ChatError::ReservedKind);
    }

    let len = frame.content.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(ChatError::ContentTooLong { len });
    }

    Ok(NewChatMessage {
        sender_id,
        receiver_id: frame.receiver_id,
        content: frame.content,
        kind: frame.kind,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::mpsc;

    use super::*;
    use crate::db::{MemoryMessageStore, StoreError};
    use crate::gateway::events::SavedMessage;

    /// Store that counts save attempts and optionally fails them.
    struct CountingStore {
        saves: AtomicUsize,
        fail: bool,
    }

    impl CountingStore {
        fn new(fail: bool) -> Self {
            Self {
                saves: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl MessageStore for CountingStore {
        async fn save(&self, _message: &NewChatMessage) -> Result<SavedMessage, StoreError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) as i64;
            if self.fail {
                return Err(StoreError::Unavailable("disk on fire".into()));
            }
            Ok(SavedMessage {
                id: 100 + n,
                created_at: Utc::now(),
            })
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

    fn online(hub: &ConnectionHub, user_id: i64, name: &str) -> mpsc::Receiver<Arc<ChatMessage>> {
        let (tx, rx) = mpsc::channel(8);
        hub.register(user_id, name, tx);
        rx
    }

    #[tokio::test]
    async fn chat_is_persisted_then_broadcast() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);
        let mut receiver = online(&hub, 2, "r");
        let mut sender = online(&hub, 1, "s");

        let delivery = handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "content": "hey"}"#)
            .await
            .unwrap();
        assert_eq!(delivery.delivered, 2);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);

        let got = receiver.try_recv().unwrap();
        assert_eq!(got.id, 100);
        assert_eq!(got.sender_id, 1);
        assert_eq!(got.content, "hey");
        assert_eq!(sender.try_recv().unwrap().id, 100);
    }

    #[tokio::test]
    async fn sender_id_comes_from_connection_not_frame() {
        let hub = ConnectionHub::new();
        let store = MemoryMessageStore::new();
        let mut receiver = online(&hub, 2, "r");

        handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "senderID": 77, "content": "x"}"#)
            .await
            .unwrap();
        assert_eq!(receiver.try_recv().unwrap().sender_id, 1);
    }

    #[tokio::test]
    async fn over_limit_content_never_reaches_store_or_hub() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);
        let mut receiver = online(&hub, 2, "r");

        let content = "x".repeat(MAX_CONTENT_CHARS + 1);
        let frame = serde_json::json!({ "receiverID": 2, "content": content }).to_string();
        let err = handle_frame(&hub, &store, 1, frame.as_bytes()).await.unwrap_err();

        assert!(matches!(err, ChatError::ContentTooLong { len } if len == MAX_CONTENT_CHARS + 1));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn limit_counts_characters_not_bytes() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);
        let _receiver = online(&hub, 2, "r");

        let content = "é".repeat(MAX_CONTENT_CHARS);
        let frame = serde_json::json!({ "receiverID": 2, "content": content }).to_string();
        assert!(handle_frame(&hub, &store, 1, frame.as_bytes()).await.is_ok());
    }

    #[tokio::test]
    async fn offline_receiver_is_rejected_before_persistence() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);

        let err = handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "content": "hi"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::RecipientUnavailable(2)));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn persistence_failure_skips_broadcast() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(true);
        let mut receiver = online(&hub, 2, "r");

        let err = handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "content": "hi"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Persistence(_)));
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);

        let err = handle_frame(&hub, &store, 1, b"not json").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidFormat(_)));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clients_cannot_send_system_messages() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);
        let _receiver = online(&hub, 2, "r");

        let err = handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "type": "system"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ReservedKind));
    }

    #[tokio::test]
    async fn typing_is_relayed_without_storage() {
        let hub = ConnectionHub::new();
        let store = CountingStore::new(false);
        let mut receiver = online(&hub, 2, "r");
        let mut sender = online(&hub, 1, "s");

        let delivery = handle_frame(&hub, &store, 1, br#"{"receiverID": 2, "type": "typing"}"#)
            .await
            .unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert_eq!(receiver.try_recv().unwrap().kind, MessageKind::Typing);
        assert!(sender.try_recv().is_err());
    }
}
