//! courierlink client (interactive)
//!
//! - Config: `courierlink.yaml`, or the path in `COURIERLINK_CONFIG`
//! - Credential: `COURIERLINK_TOKEN`
//! - Scope: `COURIERLINK_CHAT_ID` / `COURIERLINK_ORDER_ID`
//! - Every stdin line is sent as a chat message for the scoped order
//! - Ctrl-C persists the outgoing buffer and disconnects

use std::env;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use courierlink_client::auth::StaticCredentials;
use courierlink_client::buffer::OutgoingBuffer;
use courierlink_client::config;
use courierlink_client::connection::ConnectionManager;
use courierlink_client::services::{ChatService, OrderService};
use courierlink_client::store::{DurableStore, FileStore, MemoryStore};
use courierlink_client::transport::{SessionScope, WsTransport};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = env::var("COURIERLINK_CONFIG").unwrap_or_else(|_| "courierlink.yaml".into());
    let cfg = config::load_from_file(&path).expect("config load failed");
    let settings = cfg.link_settings().expect("link settings");

    let store: Arc<dyn DurableStore> = match &cfg.store.path {
        Some(dir) => Arc::new(FileStore::new(dir.clone()).expect("store directory")),
        None => Arc::new(MemoryStore::new()),
    };

    let token = env::var("COURIERLINK_TOKEN").unwrap_or_default();
    let credentials = Arc::new(StaticCredentials::new(token, None));
    let buffer = OutgoingBuffer::spawn(cfg.buffer_settings(), store.clone());
    let link = ConnectionManager::new(settings, Arc::new(WsTransport), credentials, buffer);

    let scope = SessionScope {
        chat_id: env::var("COURIERLINK_CHAT_ID").ok(),
        order_id: env::var("COURIERLINK_ORDER_ID").ok(),
    };
    let chat_order = scope.chat_id.clone().or_else(|| scope.order_id.clone());

    link.on_open(|| tracing::info!("link open"));
    link.on_close(|reason| tracing::warn!(%reason, "link closed"));

    let chat = ChatService::new(link.clone(), store.clone(), "cli");
    chat.attach(|msg| tracing::info!(from = %msg.from_user_id, text = %msg.text, "chat"));

    let orders = OrderService::new(link.clone(), store.clone());
    orders.attach();
    let mut order_events = orders.subscribe();
    tokio::spawn(async move {
        while let Ok(ev) = order_events.recv().await {
            tracing::info!(?ev, "order event");
        }
    });

    tracing::info!(url = %cfg.link.url, ?scope, "courierlink-client starting");
    link.connect(scope);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) if !text.trim().is_empty() => match &chat_order {
                    Some(order_id) => {
                        if let Err(e) = chat.send_text(order_id, text.trim()).await {
                            tracing::warn!(error = %e, "chat not sent");
                        }
                    }
                    None => tracing::warn!("no chat or order id; set COURIERLINK_CHAT_ID"),
                },
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if let Err(e) = link.buffer().save_now().await {
        tracing::warn!(error = %e, "outgoing buffer not saved");
    }
    link.disconnect().await;
    tracing::info!(stats = %link.stats().render(), "courierlink-client stopped");
}
