use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use lingo_types::events::RelayEvent;

/// A live gateway connection.
struct ConnectionHandle {
    participant_id: Uuid,
    tx: mpsc::UnboundedSender<RelayEvent>,
    chats: HashSet<Uuid>,
}

/// Subscription registry for realtime delivery.
///
/// Chat-scoped events go to every connection subscribed to the chat;
/// translations go only to subscribed connections of the reader they were
/// made for. Each connection has one FIFO channel, so events arrive in
/// publish order.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> handle. Lock before `chat_subscribers` when taking both.
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,

    /// chat_id -> conn_ids
    chat_subscribers: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns (conn_id, receiver).
    pub async fn register(&self, participant_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<RelayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionHandle {
                participant_id,
                tx,
                chats: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection and all of its subscriptions.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        let Some(handle) = connections.remove(&conn_id) else {
            return;
        };
        let mut subscribers = self.inner.chat_subscribers.write().await;
        for chat_id in handle.chats {
            if let Some(set) = subscribers.get_mut(&chat_id) {
                set.remove(&conn_id);
                if set.is_empty() {
                    subscribers.remove(&chat_id);
                }
            }
        }
    }

    /// Subscribe a connection to a chat. Authorization is the caller's job.
    pub async fn subscribe(&self, conn_id: Uuid, chat_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(handle) = connections.get_mut(&conn_id) else {
            return false;
        };
        handle.chats.insert(chat_id);
        self.inner
            .chat_subscribers
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(conn_id);
        true
    }

    pub async fn unsubscribe(&self, conn_id: Uuid, chat_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(handle) = connections.get_mut(&conn_id) {
            handle.chats.remove(&chat_id);
        }
        let mut subscribers = self.inner.chat_subscribers.write().await;
        if let Some(set) = subscribers.get_mut(&chat_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                subscribers.remove(&chat_id);
            }
        }
    }

    /// Send an event straight to one connection (Ready, Subscribed).
    pub async fn send_to_connection(&self, conn_id: Uuid, event: RelayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(handle) = connections.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Deliver a chat-scoped event. Returns how many connections got it.
    pub async fn publish(&self, event: RelayEvent) -> usize {
        let Some(chat_id) = event.chat_id() else {
            return 0;
        };
        let recipient = event.recipient();
        let closing = matches!(event, RelayEvent::ChatDeleted { .. });

        let delivered = {
            let connections = self.inner.connections.read().await;
            let subscribers = self.inner.chat_subscribers.read().await;
            let Some(conn_ids) = subscribers.get(&chat_id) else {
                return 0;
            };

            let mut delivered = 0;
            for conn_id in conn_ids {
                let Some(handle) = connections.get(conn_id) else {
                    continue;
                };
                if recipient.is_some_and(|r| r != handle.participant_id) {
                    continue;
                }
                if handle.tx.send(event.clone()).is_err() {
                    warn!("Relay stream {} closed, dropping event for chat {}", conn_id, chat_id);
                    continue;
                }
                delivered += 1;
            }
            delivered
        };

        if closing {
            self.drop_chat(chat_id).await;
        }
        delivered
    }

    /// Forget every subscription to a chat that no longer exists.
    async fn drop_chat(&self, chat_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        let removed = self.inner.chat_subscribers.write().await.remove(&chat_id);
        for conn_id in removed.into_iter().flatten() {
            if let Some(handle) = connections.get_mut(&conn_id) {
                handle.chats.remove(&chat_id);
            }
        }
    }

    pub async fn subscriber_count(&self, chat_id: Uuid) -> usize {
        self.inner
            .chat_subscribers
            .read()
            .await
            .get(&chat_id)
            .map_or(0, HashSet::len)
    }
}
