#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use courierlink_client::buffer::{BufferSettings, BufferSink, OutgoingBuffer};
use courierlink_client::store::{load_json, save_json, DurableStore, FileStore, MemoryStore};
use courierlink_core::error::{LinkError, Result};
use courierlink_core::protocol::payload::ChatMessage;

const KEY: &str = "outgoingBuffer";

fn msg(text: &str) -> ChatMessage {
    ChatMessage::new("1", "u1", text)
}

fn settings(capacity: usize) -> BufferSettings {
    BufferSettings {
        capacity,
        ..BufferSettings::default()
    }
}

fn texts(msgs: &[ChatMessage]) -> Vec<String> {
    msgs.iter().map(|m| m.text.clone()).collect()
}

/// Records deliveries; fails the `fail_at`-th call (1-based) if set.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
    calls: AtomicUsize,
    fail_at: Option<usize>,
}

impl RecordingSink {
    fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BufferSink<ChatMessage> for RecordingSink {
    async fn deliver(&self, msg: &ChatMessage) -> Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(LinkError::Transport("socket reset".into()));
        }
        self.sent.lock().unwrap().push(msg.text.clone());
        Ok(())
    }
}

/// Never completes a delivery.
struct StuckSink;

#[async_trait]
impl BufferSink<ChatMessage> for StuckSink {
    async fn deliver(&self, _msg: &ChatMessage) -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

#[tokio::test]
async fn over_capacity_keeps_most_recent() {
    let buffer = OutgoingBuffer::spawn(settings(3), Arc::new(MemoryStore::new()));
    for t in ["a", "b", "c", "d", "e"] {
        buffer.enqueue(msg(t));
    }
    assert_eq!(texts(&buffer.snapshot().await), vec!["c", "d", "e"]);
}

#[tokio::test]
async fn zero_capacity_holds_one_message() {
    let store = Arc::new(MemoryStore::new());
    save_json(store.as_ref(), KEY, &vec![msg("p1"), msg("p2"), msg("p3")])
        .await
        .unwrap();

    let buffer = OutgoingBuffer::spawn(settings(0), store);
    buffer.enqueue(msg("a"));
    buffer.enqueue(msg("b"));

    let held = tokio::time::timeout(Duration::from_secs(3), buffer.snapshot())
        .await
        .expect("buffer task stopped answering");
    assert_eq!(texts(&held), vec!["b"]);
}

#[tokio::test]
async fn restore_over_capacity_drops_oldest() {
    let store = Arc::new(MemoryStore::new());
    save_json(store.as_ref(), KEY, &vec![msg("p1"), msg("p2"), msg("p3")])
        .await
        .unwrap();

    let buffer = OutgoingBuffer::spawn(settings(2), store);
    assert_eq!(texts(&buffer.snapshot().await), vec!["p2", "p3"]);
}

#[tokio::test]
async fn flush_is_fifo_and_clears_store() {
    let store = Arc::new(MemoryStore::new());
    let buffer = OutgoingBuffer::spawn(settings(10), store.clone());
    for t in ["a", "b", "c"] {
        buffer.enqueue(msg(t));
    }
    buffer.save_now().await.unwrap();
    assert!(store.load(KEY).await.unwrap().is_some());

    let sink = Arc::new(RecordingSink::default());
    assert_eq!(buffer.flush(sink.clone()).await.unwrap(), 3);
    assert_eq!(sink.sent(), vec!["a", "b", "c"]);
    assert!(buffer.is_empty().await);
    assert!(store.load(KEY).await.unwrap().is_none());
}

#[tokio::test]
async fn failure_on_kth_message_reinserts_it_at_front() {
    let store = Arc::new(MemoryStore::new());
    let buffer = OutgoingBuffer::spawn(settings(10), store.clone());
    for t in ["a", "b", "c", "d", "e"] {
        buffer.enqueue(msg(t));
    }

    let sink = Arc::new(RecordingSink::failing_at(3));
    let err = buffer.flush(sink.clone()).await.unwrap_err();
    assert!(err.is_retriable());
    assert_eq!(sink.sent(), vec!["a", "b"]);
    assert_eq!(texts(&buffer.snapshot().await), vec!["c", "d", "e"]);

    // Persisted immediately, not after the debounce.
    let persisted: Vec<ChatMessage> = load_json(store.as_ref(), KEY).await.unwrap().unwrap();
    assert_eq!(texts(&persisted), vec!["c", "d", "e"]);

    let retry = Arc::new(RecordingSink::default());
    assert_eq!(buffer.flush(retry.clone()).await.unwrap(), 3);
    assert_eq!(retry.sent(), vec!["c", "d", "e"]);
}

#[tokio::test]
async fn persisted_messages_flush_in_persisted_order() {
    let store = Arc::new(MemoryStore::new());
    let persisted = vec![msg("x"), msg("y"), msg("z")];
    save_json(store.as_ref(), KEY, &persisted).await.unwrap();

    let buffer = OutgoingBuffer::spawn(settings(10), store.clone());
    let sink = Arc::new(RecordingSink::default());
    assert_eq!(buffer.flush(sink.clone()).await.unwrap(), 3);
    assert_eq!(sink.sent(), vec!["x", "y", "z"]);
}

#[tokio::test]
async fn restore_merges_instead_of_clobbering() {
    let store = Arc::new(MemoryStore::new());
    let x = msg("x");
    save_json(store.as_ref(), KEY, &vec![x.clone(), msg("y")]).await.unwrap();

    let buffer = OutgoingBuffer::spawn(settings(10), store.clone());
    buffer.enqueue(msg("z"));
    buffer.enqueue(x.clone());

    assert_eq!(buffer.restore_from_disk().await.unwrap(), 2);
    assert_eq!(texts(&buffer.snapshot().await), vec!["x", "y", "z"]);
}

#[tokio::test]
async fn duplicate_identity_is_ignored() {
    let buffer = OutgoingBuffer::spawn(settings(10), Arc::new(MemoryStore::new()));
    let m = msg("once");
    buffer.enqueue(m.clone());
    buffer.enqueue(m);
    assert_eq!(buffer.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn enqueue_persists_after_debounce() {
    let store = Arc::new(MemoryStore::new());
    let buffer = OutgoingBuffer::spawn(settings(10), store.clone());
    buffer.enqueue(msg("a"));
    buffer.enqueue(msg("b"));
    assert_eq!(buffer.len().await, 2);
    assert!(store.load(KEY).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let persisted: Vec<ChatMessage> = load_json(store.as_ref(), KEY).await.unwrap().unwrap();
    assert_eq!(texts(&persisted), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_send_times_out_and_stays_buffered() {
    let buffer = OutgoingBuffer::spawn(
        BufferSettings {
            send_timeout: Duration::from_millis(100),
            ..settings(10)
        },
        Arc::new(MemoryStore::new()),
    );
    buffer.enqueue(msg("a"));

    let err = buffer.flush(Arc::new(StuckSink)).await.unwrap_err();
    assert_eq!(err.class().as_str(), "TIMEOUT");
    assert_eq!(texts(&buffer.snapshot().await), vec!["a"]);
}

#[tokio::test]
async fn concurrent_flushes_are_serialized() {
    let buffer = OutgoingBuffer::spawn(settings(10), Arc::new(MemoryStore::new()));
    for t in ["a", "b", "c"] {
        buffer.enqueue(msg(t));
    }
    let sink = Arc::new(RecordingSink::default());
    let (first, second) = tokio::join!(buffer.flush(sink.clone()), buffer.flush(sink.clone()));

    let mut counts = vec![first.unwrap(), second.unwrap()];
    counts.sort_unstable();
    assert_eq!(counts, vec![0, 3]);
    assert_eq!(sink.sent(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let first = OutgoingBuffer::spawn(settings(10), Arc::new(FileStore::new(dir.path()).unwrap()));
    first.enqueue(msg("a"));
    first.enqueue(msg("b"));
    first.save_now().await.unwrap();
    drop(first);

    let second: OutgoingBuffer<ChatMessage> =
        OutgoingBuffer::spawn(settings(10), Arc::new(FileStore::new(dir.path()).unwrap()));
    assert_eq!(texts(&second.snapshot().await), vec!["a", "b"]);
}
