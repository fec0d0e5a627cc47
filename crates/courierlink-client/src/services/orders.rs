use std::sync::Arc;

use tokio::sync::broadcast;

use courierlink_core::error::Result;
use courierlink_core::protocol::payload::{CourierModel, OrderAck, OrderModel, OrderStatus};

use crate::connection::ConnectionManager;
use crate::store::{load_json, modify_json, save_json, DurableStore};
use crate::transport::SessionScope;

const EVENT_CAPACITY: usize = 64;

pub fn order_key(order_id: &str) -> String {
    format!("order:{order_id}")
}

/// Customer-side order notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Updated(OrderModel),
    Assigned { order_id: String, courier: CourierModel },
    Cancelled { order_id: String, reason: Option<String> },
    Completed { order_id: String },
    Acked { order_id: Option<String>, ack: OrderAck },
}

/// Tracks orders for the customer app: keeps the latest `OrderModel` per
/// order in the store and republishes events on a broadcast channel.
#[derive(Clone)]
pub struct OrderService {
    link: ConnectionManager,
    store: Arc<dyn DurableStore>,
    events: broadcast::Sender<OrderEvent>,
}

impl OrderService {
    pub fn new(link: ConnectionManager, store: Arc<dyn DurableStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { link, store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    /// Connect scoped to `order_id`.
    pub fn track(&self, order_id: &str) {
        self.link.connect(SessionScope::order(order_id));
    }

    pub fn cancel(&self, order_id: &str, reason: Option<&str>) {
        self.link.cancel_order(order_id, reason);
    }

    pub async fn latest(&self, order_id: &str) -> Result<Option<OrderModel>> {
        load_json(self.store.as_ref(), &order_key(order_id)).await
    }

    /// Claim the order callback slots.
    pub fn attach(&self) {
        let (store, events) = (self.store.clone(), self.events.clone());
        self.link.on_order_updated(move |order| {
            let (store, events) = (store.clone(), events.clone());
            tokio::spawn(async move {
                if let Some(id) = order.id.clone().or_else(|| order.idempotency_key.clone()) {
                    if let Err(e) = save_json(store.as_ref(), &order_key(&id), &order).await {
                        tracing::warn!(order_id = %id, error = %e, "order not saved");
                    }
                }
                let _ = events.send(OrderEvent::Updated(order));
            });
        });

        let events = self.events.clone();
        self.link.on_order_assigned(move |order_id, courier| {
            let _ = events.send(OrderEvent::Assigned { order_id, courier });
        });

        let (store, events) = (self.store.clone(), self.events.clone());
        self.link.on_order_cancelled(move |order_id, reason| {
            let (store, events) = (store.clone(), events.clone());
            tokio::spawn(async move {
                set_status(store.as_ref(), &order_id, OrderStatus::Cancelled).await;
                let _ = events.send(OrderEvent::Cancelled { order_id, reason });
            });
        });

        let (store, events) = (self.store.clone(), self.events.clone());
        self.link.on_order_completed(move |order_id| {
            let (store, events) = (store.clone(), events.clone());
            tokio::spawn(async move {
                set_status(store.as_ref(), &order_id, OrderStatus::Done).await;
                let _ = events.send(OrderEvent::Completed { order_id });
            });
        });

        let events = self.events.clone();
        self.link.on_order_ack(move |order_id, ack| {
            tracing::debug!(?order_id, server_order_id = ?ack.server_order_id, "order acknowledged");
            let _ = events.send(OrderEvent::Acked { order_id, ack });
        });
    }
}

/// Update the stored status if the order is known locally.
async fn set_status(store: &dyn DurableStore, order_id: &str, status: OrderStatus) {
    let res = modify_json::<OrderModel, _>(store, &order_key(order_id), move |current| {
        current.map(|mut order| {
            order.status = status;
            order
        })
    })
    .await;
    if let Err(e) = res {
        tracing::warn!(order_id, error = %e, "order status not saved");
    }
}
