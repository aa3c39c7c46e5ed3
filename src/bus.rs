//! In-process message bus with named topics
//!
//! ```text
//!  BusClient::publish("AWX_CHANGES", ..)
//!         │
//!         ▼
//!  ┌──────────────────────────────┐
//!  │ MessageBus                   │  one broadcast::Sender per topic,
//!  │   "AWX_CHANGES" → Sender     │  created on first publish/subscribe
//!  │   "AWX_ERROR"   → Sender     │
//!  └──────────────┬───────────────┘
//!                 │ forwarder task per subscription
//!                 ▼
//!  BusClient inbox (mpsc) ──► BusClient::get(timeout)
//! ```
//!
//! Every task obtains its own [`BusClient`]. A client sees every message published on
//! its topics after `subscribe` returned, in publish order per topic. Nothing is
//! persisted; slow subscribers may lag and lose messages.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Default per-topic buffer
const DEFAULT_CAPACITY: usize = 256;

/// A message as seen by a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: String,
}

/// The three channels every source publishes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub changes: String,
    pub info: String,
    pub error: String,
}

impl Topics {
    /// `<PREFIX>_CHANGES`, `<PREFIX>_INFO`, `<PREFIX>_ERROR`
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.to_uppercase();
        Self {
            changes: format!("{prefix}_CHANGES"),
            info: format!("{prefix}_INFO"),
            error: format!("{prefix}_ERROR"),
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.changes, &self.info, &self.error]
    }
}

/// Role of a topic, derived from its suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Changes,
    Info,
    Error,
    Other,
}

impl TopicKind {
    pub fn of(topic: &str) -> Self {
        if topic.ends_with("_CHANGES") {
            TopicKind::Changes
        } else if topic.ends_with("_INFO") {
            TopicKind::Info
        } else if topic.ends_with("_ERROR") {
            TopicKind::Error
        } else {
            TopicKind::Other
        }
    }
}

/// Shared topic registry
///
/// Cheap to clone; all clones refer to the same topics.
#[derive(Debug, Clone)]
pub struct MessageBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<BusMessage>>>>,
    capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Create a new client handle for one task
    pub fn client(&self) -> BusClient {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        BusClient {
            bus: self.clone(),
            inbox_tx,
            inbox_rx,
            subscriptions: HashSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Names of all topics created so far
    pub async fn topic_names(&self) -> Vec<String> {
        let topics = self.topics.lock().await;
        let mut names: Vec<_> = topics.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Per-task handle to the bus
pub struct BusClient {
    bus: MessageBus,
    inbox_tx: mpsc::UnboundedSender<BusMessage>,
    inbox_rx: mpsc::UnboundedReceiver<BusMessage>,
    subscriptions: HashSet<String>,

    /// Stops the forwarder tasks of this client
    cancel: CancellationToken,
}

impl BusClient {
    /// Publish a text message, returning the number of subscribers it reached
    pub async fn publish(&self, topic: &str, payload: impl Into<String>) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.into(),
        };

        match self.bus.sender(topic).await.send(message) {
            Ok(receivers) => {
                trace!("published to {topic} ({receivers} subscribers)");
                receivers
            }
            Err(_) => {
                trace!("published to {topic} without subscribers");
                0
            }
        }
    }

    /// Enroll on a topic; subscribing twice has no effect
    pub async fn subscribe(&mut self, topic: &str) {
        if !self.subscriptions.insert(topic.to_string()) {
            return;
        }

        let mut receiver = self.bus.sender(topic).await.subscribe();
        let inbox = self.inbox_tx.clone();
        let cancel = self.cancel.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    received = receiver.recv() => match received {
                        Ok(message) => {
                            if inbox.send(message).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("subscriber on {topic} lagged, skipped {skipped} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(String::as_str)
    }

    /// Wait up to `timeout` for the next message on any subscribed topic
    pub async fn get(&mut self, timeout: Duration) -> Option<BusMessage> {
        match tokio::time::timeout(timeout, self.inbox_rx.recv()).await {
            Ok(message) => message,
            Err(_) => None,
        }
    }

    /// Drop all subscriptions; messages already in the inbox stay readable
    pub fn unsubscribe_all(&mut self) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.subscriptions.clear();
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
