use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, timeout, Instant};

use courierlink_core::error::{LinkError, Result};

use crate::store::{load_json, save_json, DurableStore};

use super::{BufferSettings, BufferSink, Buffered};

enum Command<M> {
    Enqueue(M),
    Flush {
        sink: Arc<dyn BufferSink<M>>,
        reply: oneshot::Sender<Result<usize>>,
    },
    Restore(oneshot::Sender<Result<usize>>),
    SaveNow(oneshot::Sender<Result<()>>),
    Snapshot(oneshot::Sender<Vec<M>>),
    Clear(oneshot::Sender<Result<()>>),
}

/// Handle to the buffer task. Cheap to clone; all state lives in the task,
/// so callers never lock anything.
///
/// Flushes are serialized: a flush requested while another runs is queued
/// behind it and sees whatever the first one left.
pub struct OutgoingBuffer<M> {
    tx: mpsc::UnboundedSender<Command<M>>,
}

impl<M> Clone for OutgoingBuffer<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M: Buffered> OutgoingBuffer<M> {
    /// Spawn the buffer task. The task restores persisted entries before it
    /// handles any command, so no flush can run ahead of the load.
    ///
    /// A capacity of zero is raised to one.
    pub fn spawn(mut settings: BufferSettings, store: Arc<dyn DurableStore>) -> Self {
        if settings.capacity == 0 {
            tracing::warn!("outgoing buffer capacity 0 raised to 1");
            settings.capacity = 1;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let task = BufferTask {
            settings,
            store,
            queue: VecDeque::new(),
            save_at: None,
        };
        tokio::spawn(task.run(rx));
        Self { tx }
    }

    /// Append `msg`; evicts the oldest entry when full. Never fails.
    pub fn enqueue(&self, msg: M) {
        if self.tx.send(Command::Enqueue(msg)).is_err() {
            tracing::error!("outgoing buffer task is gone; message dropped");
        }
    }

    /// Deliver buffered messages one at a time, in order. Returns how many
    /// were delivered. On the first failure the failed message goes back to
    /// the front and the error is returned.
    pub async fn flush(&self, sink: Arc<dyn BufferSink<M>>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Flush { sink, reply }, rx).await?
    }

    /// Merge the persisted sequence into memory. Returns the number of
    /// persisted entries found.
    pub async fn restore_from_disk(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Restore(reply), rx).await?
    }

    /// Persist immediately, skipping the debounce.
    pub async fn save_now(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SaveNow(reply), rx).await?
    }

    pub async fn snapshot(&self) -> Vec<M> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Snapshot(reply), rx).await.unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn peek_first(&self) -> Option<M> {
        self.snapshot().await.into_iter().next()
    }

    /// Drop everything, in memory and on disk.
    pub async fn clear(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Clear(reply), rx).await?
    }

    async fn request<T>(&self, cmd: Command<M>, rx: oneshot::Receiver<T>) -> Result<T> {
        self.tx
            .send(cmd)
            .map_err(|_| LinkError::Internal("outgoing buffer task is gone".into()))?;
        rx.await
            .map_err(|_| LinkError::Internal("outgoing buffer task dropped the reply".into()))
    }
}

struct BufferTask<M> {
    settings: BufferSettings,
    store: Arc<dyn DurableStore>,
    queue: VecDeque<M>,
    /// Trailing debounce deadline for the next persistence write.
    save_at: Option<Instant>,
}

impl<M: Buffered> BufferTask<M> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<M>>) {
        match self.restore().await {
            Ok(n) => tracing::debug!(restored = n, key = %self.settings.storage_key, "outgoing buffer restored"),
            Err(e) => tracing::warn!(error = %e, "outgoing buffer restore failed; starting empty"),
        }

        loop {
            let deadline = self.save_at;
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        if self.save_at.take().is_some() {
                            self.persist_logged().await;
                        }
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.save_at = None;
                    self.persist_logged().await;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: Command<M>) {
        match cmd {
            Command::Enqueue(msg) => self.enqueue(msg),
            Command::Flush { sink, reply } => {
                let res = self.flush(sink.as_ref()).await;
                let _ = reply.send(res);
            }
            Command::Restore(reply) => {
                let res = self.restore().await;
                let _ = reply.send(res);
            }
            Command::SaveNow(reply) => {
                self.save_at = None;
                let _ = reply.send(self.persist().await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.queue.iter().cloned().collect());
            }
            Command::Clear(reply) => {
                self.queue.clear();
                self.save_at = None;
                let _ = reply.send(self.store.remove(&self.settings.storage_key).await);
            }
        }
    }

    fn enqueue(&mut self, msg: M) {
        if self.queue.iter().any(|m| m.identity() == msg.identity()) {
            tracing::debug!(identity = msg.identity(), "duplicate message ignored");
            return;
        }
        if self.queue.len() >= self.settings.capacity {
            if let Some(old) = self.queue.pop_front() {
                tracing::warn!(
                    identity = old.identity(),
                    queued_at = %old.timestamp(),
                    capacity = self.settings.capacity,
                    "outgoing buffer full; dropped oldest"
                );
            }
        }
        self.queue.push_back(msg);
        self.save_at = Some(Instant::now() + self.settings.save_debounce);
    }

    async fn flush(&mut self, sink: &dyn BufferSink<M>) -> Result<usize> {
        let mut sent = 0usize;
        while let Some(msg) = self.queue.pop_front() {
            let outcome = match timeout(self.settings.send_timeout, sink.deliver(&msg)).await {
                Ok(r) => r,
                Err(_) => Err(LinkError::Timeout("buffered send not acknowledged".into())),
            };
            if let Err(e) = outcome {
                tracing::warn!(identity = msg.identity(), sent, error = %e, "flush stopped");
                self.queue.push_front(msg);
                self.save_at = None;
                self.persist_logged().await;
                return Err(e);
            }
            sent += 1;
        }

        self.save_at = None;
        self.store.remove(&self.settings.storage_key).await?;
        if sent > 0 {
            tracing::debug!(sent, "outgoing buffer drained");
        }
        Ok(sent)
    }

    /// Persisted entries first, then in-memory entries not already present.
    async fn restore(&mut self) -> Result<usize> {
        let persisted: Vec<M> = load_json(self.store.as_ref(), &self.settings.storage_key)
            .await?
            .unwrap_or_default();
        let found = persisted.len();

        let mut seen: HashSet<String> = HashSet::with_capacity(found);
        let mut merged: VecDeque<M> = VecDeque::with_capacity(found + self.queue.len());
        for m in persisted.into_iter().chain(std::mem::take(&mut self.queue)) {
            if seen.insert(m.identity().to_string()) {
                merged.push_back(m);
            }
        }
        let excess = merged.len().saturating_sub(self.settings.capacity);
        if excess > 0 {
            tracing::warn!(excess, "restored buffer over capacity; dropped oldest");
            merged.drain(..excess);
        }
        self.queue = merged;
        Ok(found)
    }

    async fn persist(&self) -> Result<()> {
        let key = &self.settings.storage_key;
        if self.queue.is_empty() {
            self.store.remove(key).await
        } else {
            save_json(self.store.as_ref(), key, &self.queue).await
        }
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "outgoing buffer persist failed");
        }
    }
}
