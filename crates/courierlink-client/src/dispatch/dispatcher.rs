use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use courierlink_core::protocol::codec::decode_event;
use courierlink_core::protocol::payload::{
    ChatMessage, CourierModel, InboundEvent, LocationFix, OrderAck, OrderModel, OrderOffer,
    OrderStatus,
};
use courierlink_core::protocol::{Envelope, EventType};

use crate::connection::CloseReason;
use crate::obs::LinkStats;

pub type Handler = Arc<dyn Fn(InboundEvent) + Send + Sync>;
pub type OpenHook = Arc<dyn Fn() + Send + Sync>;
pub type CloseHook = Arc<dyn Fn(CloseReason) + Send + Sync>;

/// One callback slot per event type plus the lifecycle hooks.
///
/// Registering again for the same type replaces the previous callback.
/// Unknown event tags are counted and never routed. A payload is decoded only
/// when a callback for its type exists.
pub struct Dispatcher {
    handlers: DashMap<EventType, Handler>,
    on_open: RwLock<Option<OpenHook>>,
    on_close: RwLock<Option<CloseHook>>,
    stats: Arc<LinkStats>,
}

impl Dispatcher {
    pub fn new(stats: Arc<LinkStats>) -> Self {
        Self {
            handlers: DashMap::new(),
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            stats,
        }
    }

    pub fn register(&self, event: EventType, handler: Handler) {
        self.handlers.insert(event, handler);
    }

    pub fn unregister(&self, event: EventType) {
        self.handlers.remove(&event);
    }

    pub fn registered(&self) -> Vec<EventType> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    pub fn set_on_open(&self, hook: OpenHook) {
        *self.on_open.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn set_on_close(&self, hook: CloseHook) {
        *self.on_close.write().unwrap_or_else(|e| e.into_inner()) = Some(hook);
    }

    pub fn on_order_offered(&self, f: impl Fn(OrderOffer) + Send + Sync + 'static) {
        self.register(
            EventType::OrderOffered,
            Arc::new(move |ev| {
                if let InboundEvent::OrderOffered(offer) = ev {
                    f(offer)
                }
            }),
        );
    }

    pub fn on_order_assigned(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.register(
            EventType::OrderAssigned,
            Arc::new(move |ev| {
                if let InboundEvent::OrderAssigned { order_id, courier } = ev {
                    f(order_id, courier)
                }
            }),
        );
    }

    pub fn on_order_cancelled(&self, f: impl Fn(String, Option<String>) + Send + Sync + 'static) {
        self.register(
            EventType::OrderCancelled,
            Arc::new(move |ev| {
                if let InboundEvent::OrderCancelled { order_id, reason } = ev {
                    f(order_id, reason)
                }
            }),
        );
    }

    pub fn on_order_updated(&self, f: impl Fn(OrderModel) + Send + Sync + 'static) {
        self.register(
            EventType::OrderUpdated,
            Arc::new(move |ev| {
                if let InboundEvent::OrderUpdated(order) = ev {
                    f(order)
                }
            }),
        );
    }

    pub fn on_order_completed(&self, f: impl Fn(String) + Send + Sync + 'static) {
        self.register(
            EventType::OrderCompleted,
            Arc::new(move |ev| {
                if let InboundEvent::OrderCompleted { order_id } = ev {
                    f(order_id)
                }
            }),
        );
    }

    pub fn on_courier_location(&self, f: impl Fn(String, LocationFix) + Send + Sync + 'static) {
        self.register(
            EventType::CourierLocation,
            Arc::new(move |ev| {
                if let InboundEvent::CourierLocation { order_id, fix } = ev {
                    f(order_id, fix)
                }
            }),
        );
    }

    pub fn on_chat_message(&self, f: impl Fn(ChatMessage) + Send + Sync + 'static) {
        self.register(
            EventType::ChatMessage,
            Arc::new(move |ev| {
                if let InboundEvent::ChatMessage(msg) = ev {
                    f(msg)
                }
            }),
        );
    }

    pub fn on_courier_accepted(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.register(
            EventType::CourierAccepted,
            Arc::new(move |ev| {
                if let InboundEvent::CourierAccepted { order_id, courier } = ev {
                    f(order_id, courier)
                }
            }),
        );
    }

    pub fn on_courier_declined(&self, f: impl Fn(String, CourierModel) + Send + Sync + 'static) {
        self.register(
            EventType::CourierDeclined,
            Arc::new(move |ev| {
                if let InboundEvent::CourierDeclined { order_id, courier } = ev {
                    f(order_id, courier)
                }
            }),
        );
    }

    pub fn on_order_ack(&self, f: impl Fn(Option<String>, OrderAck) + Send + Sync + 'static) {
        self.register(
            EventType::OrderAck,
            Arc::new(move |ev| {
                if let InboundEvent::OrderAck { order_id, ack } = ev {
                    f(order_id, ack)
                }
            }),
        );
    }

    pub fn on_heartbeat(&self, f: impl Fn() + Send + Sync + 'static) {
        self.register(
            EventType::Heartbeat,
            Arc::new(move |ev| {
                if matches!(ev, InboundEvent::Heartbeat) {
                    f()
                }
            }),
        );
    }

    fn handler(&self, event: EventType) -> Option<Handler> {
        self.handlers.get(&event).map(|h| h.value().clone())
    }

    /// Route one decoded envelope. Never fails; problems are logged and counted.
    pub fn dispatch(&self, env: &Envelope) {
        let Some(kind) = env.event_type() else {
            self.stats.unknown_type();
            tracing::debug!(tag = %env.event, "unknown event type ignored");
            return;
        };

        let handler = self.handler(kind);
        let completion = if kind == EventType::OrderUpdated {
            self.handler(EventType::OrderCompleted)
        } else {
            None
        };
        if handler.is_none() && completion.is_none() {
            self.stats.unhandled();
            tracing::trace!(event = %kind, "no callback registered");
            return;
        }

        let ev = match decode_event(kind, env) {
            Ok(ev) => ev,
            Err(e) => {
                self.stats.decode_drop();
                tracing::warn!(event = %kind, error = %e, "payload dropped");
                return;
            }
        };

        // orderUpdated with status done also counts as completion.
        let done_id = match (&ev, &completion) {
            (InboundEvent::OrderUpdated(order), Some(_)) if order.status == OrderStatus::Done => {
                order.id.clone().or_else(|| env.order_id.clone())
            }
            _ => None,
        };

        if let Some(h) = handler {
            h(ev);
        }
        if let (Some(order_id), Some(done)) = (done_id, completion) {
            done(InboundEvent::OrderCompleted { order_id });
        }
    }

    /// Legacy bare chat frames go straight to the chat callback.
    pub fn dispatch_chat(&self, msg: ChatMessage) {
        match self.handler(EventType::ChatMessage) {
            Some(h) => h(InboundEvent::ChatMessage(msg)),
            None => self.stats.unhandled(),
        }
    }

    pub fn opened(&self) {
        let hook = self.on_open.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn closed(&self, reason: CloseReason) {
        let hook = self.on_close.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(hook) = hook {
            hook(reason);
        }
    }
}
