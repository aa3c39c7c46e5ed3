//! AWX notification webhook receiver
//!
//! AWX pushes a JSON notification whenever a job finishes. The HTTP handler only
//! enqueues; `fetch` drains the queue into one envelope per cycle.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actors::source::Source;
use crate::config::AwxWebhookConfig;
use crate::envelope::{Envelope, StatusEnvelope, StatusRecord, normalize_timestamp};
use crate::error::FetchError;
use crate::sources::awx::awx_status;

/// Notifications buffered between two fetches
const QUEUE_CAPACITY: usize = 1024;

/// Subset of the AWX notification body
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    pub name: String,
    pub status: String,
    pub finished: Option<String>,
    pub url: Option<String>,
}

impl From<Notification> for StatusRecord {
    fn from(notification: Notification) -> Self {
        StatusRecord::new(notification.name, awx_status(&notification.status))
            .with_timestamp(notification.finished.as_deref().and_then(normalize_timestamp))
            .with_details_url(notification.url)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn notify(
    State(queue): State<mpsc::Sender<Notification>>,
    Json(notification): Json<Notification>,
) -> StatusCode {
    debug!("notification for {}: {}", notification.name, notification.status);
    match queue.try_send(notification) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!("dropping notification: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn router(queue: mpsc::Sender<Notification>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/notifications", post(notify))
        .with_state(queue)
}

pub struct WebhookSource {
    config: AwxWebhookConfig,
    queue_tx: mpsc::Sender<Notification>,
    queue_rx: mpsc::Receiver<Notification>,

    /// Stops the HTTP listener
    stop: CancellationToken,

    /// Bound address, known after `start`
    local_addr: Option<SocketAddr>,
}

impl WebhookSource {
    pub fn new(config: AwxWebhookConfig, stop: CancellationToken) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            config,
            queue_tx,
            queue_rx,
            stop,
            local_addr: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Source for WebhookSource {
    async fn start(&mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.listen)
            .await
            .with_context(|| format!("failed to bind webhook listener on {}", self.config.listen))?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);

        info!("webhook listening on {addr}");

        let app = router(self.queue_tx.clone());
        let stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = axum::serve(listener, app).into_future() => {
                    if let Err(e) = result {
                        error!("webhook server error: {e}");
                    }
                }
                _ = stop.cancelled() => debug!("webhook listener stopped"),
            }
        });

        Ok(())
    }

    async fn fetch(&mut self) -> Result<Envelope, FetchError> {
        let first = tokio::time::timeout(self.config.settings.polling_interval(), self.queue_rx.recv()).await;
        let Ok(Some(first)) = first else {
            return Err(FetchError::NoUpdates);
        };

        let mut status_list = vec![StatusRecord::from(first)];
        while let Ok(notification) = self.queue_rx.try_recv() {
            status_list.push(notification.into());
        }

        Ok(StatusEnvelope::new(&self.config.settings.id, status_list).into())
    }
}
