use std::sync::Arc;

use tokio::sync::mpsc;

use courierlink_core::error::Result;
use courierlink_core::protocol::payload::ChatMessage;

use crate::connection::ConnectionManager;
use crate::store::{load_json, modify_json, DurableStore};
use crate::transport::SessionScope;

/// Store key holding the chat history of one order.
pub fn history_key(order_id: &str) -> String {
    format!("chat:{order_id}")
}

/// Append `msg` to its order's history unless a message with the same id or
/// idempotency key is already there. History stays sorted by timestamp.
pub async fn append_history(store: &dyn DurableStore, msg: ChatMessage) -> Result<()> {
    let key = history_key(&msg.order_id);
    modify_json::<Vec<ChatMessage>, _>(store, &key, move |current| {
        let mut history = current.unwrap_or_default();
        let dup = history
            .iter()
            .any(|m| m.id == msg.id || m.identity() == msg.identity());
        if !dup {
            history.push(msg);
            history.sort_by_key(|m| m.timestamp);
        }
        Some(history)
    })
    .await
}

/// Per-order chat on top of the connection manager.
///
/// Outgoing messages go through the outgoing buffer; incoming ones are
/// appended to the local history before the caller's callback runs.
#[derive(Clone)]
pub struct ChatService {
    link: ConnectionManager,
    store: Arc<dyn DurableStore>,
    user_id: String,
}

impl ChatService {
    pub fn new(link: ConnectionManager, store: Arc<dyn DurableStore>, user_id: impl Into<String>) -> Self {
        Self {
            link,
            store,
            user_id: user_id.into(),
        }
    }

    /// Claim the chat callback slot. Incoming messages are handled one at a
    /// time, in arrival order, by a single task.
    pub fn attach(&self, on_message: impl Fn(ChatMessage) + Send + Sync + 'static) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
        let store = self.store.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = append_history(store.as_ref(), msg.clone()).await {
                    tracing::warn!(order_id = %msg.order_id, error = %e, "chat history not saved");
                }
                on_message(msg);
            }
        });

        self.link.on_chat_message(move |msg| {
            if tx.send(msg).is_err() {
                tracing::warn!("chat handler task is gone; message dropped");
            }
        });
    }

    /// Connect scoped to the chat of `order_id`.
    pub fn open(&self, order_id: &str) {
        self.link.connect(SessionScope::chat(order_id));
    }

    /// Record locally and hand to the outgoing buffer.
    pub async fn send_text(&self, order_id: &str, text: &str) -> Result<ChatMessage> {
        let msg = ChatMessage::new(order_id, self.user_id.as_str(), text);
        append_history(self.store.as_ref(), msg.clone()).await?;
        self.link.send(msg.clone());
        Ok(msg)
    }

    pub async fn history(&self, order_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(load_json(self.store.as_ref(), &history_key(order_id))
            .await?
            .unwrap_or_default())
    }
}
