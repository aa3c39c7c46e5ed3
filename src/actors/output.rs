//! OutputRunner - Bridges bus topics to a delivery sink
//!
//! ## Message Flow
//!
//! ```text
//! subscribe(topics) → started notice → loop { get(100ms) → decode → Sink::deliver } → Sink::close
//!                                              ↑
//!                                              └─── stop signal checked every iteration
//! ```
//!
//! A failed delivery is logged and the message dropped; the loop keeps running.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bus::{BusClient, BusMessage};
use crate::envelope::Envelope;
use crate::error::DeliveryResult;

/// How long a single bus read may block before the stop signal is rechecked
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Notice sent once subscriptions are in place
pub const STARTED_NOTICE: &str = "Output started";

/// A human-facing notification channel
#[async_trait]
pub trait Sink: Send {
    /// Name for logging
    fn name(&self) -> &str;

    /// Low-priority notice (e.g. "started"), delivered without alerting anyone
    async fn announce(&mut self, notice: &str) -> DeliveryResult<()>;

    /// Render and deliver one envelope received on `topic`
    async fn deliver(&mut self, topic: &str, envelope: &Envelope) -> DeliveryResult<()>;

    /// Release outbound resources
    async fn close(&mut self) -> DeliveryResult<()> {
        Ok(())
    }
}

/// Runner driving one sink
pub struct OutputRunner<S> {
    sink: S,

    /// Bus handle used for consuming
    client: BusClient,

    /// Topics the sink cares about
    topics: Vec<String>,

    /// Shared stop signal
    stop: CancellationToken,
}

impl<S: Sink> OutputRunner<S> {
    pub fn new(sink: S, client: BusClient, topics: Vec<String>, stop: CancellationToken) -> Self {
        Self {
            sink,
            client,
            topics,
            stop,
        }
    }

    /// Run the runner's main loop until the stop signal is observed
    #[instrument(skip(self), fields(output = %self.sink.name()))]
    pub async fn run(mut self) -> Result<()> {
        for topic in &self.topics {
            self.client.subscribe(topic).await;
        }
        info!("subscribed to topics: {:?}", self.topics);

        if let Err(e) = self.sink.announce(STARTED_NOTICE).await {
            warn!("failed to send started notice: {e}");
        }

        while !self.stop.is_cancelled() {
            let Some(message) = self.client.get(POLL_TIMEOUT).await else {
                continue;
            };

            trace!("received message on {}", message.topic);
            if let Err(e) = self.handle(&message).await {
                error!("failed to deliver message from {}: {e}", message.topic);
            }
        }

        debug!("stop signal observed, closing sink");
        self.client.unsubscribe_all();
        self.sink
            .close()
            .await
            .with_context(|| format!("failed to close sink {}", self.sink.name()))?;

        info!("output stopped");
        Ok(())
    }

    async fn handle(&mut self, message: &BusMessage) -> DeliveryResult<()> {
        let envelope: Envelope = serde_json::from_str(&message.payload)?;
        self.sink.deliver(&message.topic, &envelope).await
    }
}
