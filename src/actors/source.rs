//! SourceActor - Generic polling, deduplication and error classification
//!
//! Every concrete back-end only implements [`Source::fetch`]. The actor owns the
//! per-source [`SourceState`] and turns fetch results into topic traffic.
//!
//! ## Cycle
//!
//! ```text
//! POLLING ── fetch() bounded by request_timeout
//!    │  timeout / NoUpdates ─────────────────────────────► POLLING
//!    │  Failed ──────────────────────────────────────────► task ends (Err)
//!    ▼
//! classify (first match wins):
//!    empty status_list   → discard
//!    error present       → <PREFIX>_ERROR     (never deduplicated)
//!    duplicate           → <PREFIX>_INFO if heartbeat due, else discard
//!    anything else       → <PREFIX>_CHANGES
//!    │
//!    └── sleep polling_interval ─────────────────────────► POLLING
//! ```
//!
//! Errors are classified before duplicates so a persistent failure with unchanging
//! text keeps being reported.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

use crate::bus::{BusClient, Topics};
use crate::config::SourceSettings;
use crate::envelope::Envelope;
use crate::error::FetchError;

/// Capability every monitored back-end provides
#[async_trait]
pub trait Source: Send {
    /// One-time setup before the first fetch (subscriptions, listeners, ...)
    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Produce the current envelope
    ///
    /// Back-end failures that operators should see must be mapped into an
    /// [`crate::envelope::ErrorEnvelope`] or a record carrying `error`. Returning
    /// [`FetchError::Failed`] terminates the source.
    async fn fetch(&mut self) -> Result<Envelope, FetchError>;
}

/// What to do with one fetched envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Empty status list, never published
    Empty,

    /// Published on the error topic
    Error,

    /// Same statuses as before; `heartbeat` means re-announce on the info topic
    Duplicate { heartbeat: bool },

    /// Published on the changes topic
    Changed,
}

impl Classification {
    /// Topic to publish on, if any
    pub fn topic<'a>(&self, topics: &'a Topics) -> Option<&'a str> {
        match self {
            Classification::Empty => None,
            Classification::Error => Some(&topics.error),
            Classification::Duplicate { heartbeat: true } => Some(&topics.info),
            Classification::Duplicate { heartbeat: false } => None,
            Classification::Changed => Some(&topics.changes),
        }
    }
}

/// Deduplication and heartbeat state, owned by exactly one actor
#[derive(Debug, Clone)]
pub struct SourceState {
    /// Most recent published or suppressed result
    last_envelope: Option<Envelope>,

    /// Timestamp of the last announcement, start of the heartbeat window
    last_announced: Option<f64>,

    ignore_duplicates: bool,

    /// Seconds of silence before a duplicate is re-announced
    heartbeat_interval: f64,
}

impl SourceState {
    pub fn new(ignore_duplicates: bool, heartbeat_interval: f64) -> Self {
        Self {
            last_envelope: None,
            last_announced: None,
            ignore_duplicates,
            heartbeat_interval,
        }
    }

    pub fn last_envelope(&self) -> Option<&Envelope> {
        self.last_envelope.as_ref()
    }

    /// Classify `envelope` and advance the state accordingly
    pub fn classify(&mut self, envelope: &Envelope) -> Classification {
        if envelope.is_empty() {
            return Classification::Empty;
        }

        if envelope.has_error() {
            self.remember(envelope, true);
            return Classification::Error;
        }

        let duplicate = self.ignore_duplicates
            && self
                .last_envelope
                .as_ref()
                .is_some_and(|last| envelope.same_status(last));

        if duplicate {
            let heartbeat = match (envelope.message_timestamp(), self.last_announced) {
                (Some(now), Some(announced)) => now - announced >= self.heartbeat_interval,
                _ => false,
            };
            self.remember(envelope, heartbeat);
            return Classification::Duplicate { heartbeat };
        }

        self.remember(envelope, true);
        Classification::Changed
    }

    fn remember(&mut self, envelope: &Envelope, announced: bool) {
        if announced && let Some(timestamp) = envelope.message_timestamp() {
            self.last_announced = Some(timestamp);
        }
        self.last_envelope = Some(envelope.clone());
    }
}

/// Actor that polls one source and publishes its classified results
pub struct SourceActor<S> {
    /// The back-end being polled
    source: S,

    /// Source settings (intervals, topic prefix)
    settings: SourceSettings,

    /// Topics derived from the prefix
    topics: Topics,

    /// Bus handle used for publishing
    client: BusClient,

    /// Dedup/heartbeat state, never shared
    state: SourceState,

    /// Shared stop signal
    stop: CancellationToken,
}

impl<S: Source> SourceActor<S> {
    pub fn new(source: S, settings: SourceSettings, client: BusClient, stop: CancellationToken) -> Self {
        let state = SourceState::new(settings.ignores_duplicates(), settings.heartbeat_interval);
        Self {
            source,
            topics: settings.topics(),
            settings,
            client,
            state,
            stop,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Run the actor's main loop
    ///
    /// Returns when the stop signal is observed between cycles, or with an error if
    /// the source failed in a way it could not report itself.
    #[instrument(skip(self), fields(source = %self.settings.id))]
    pub async fn run(mut self) -> Result<()> {
        self.source
            .start()
            .await
            .with_context(|| format!("failed to start source {}", self.settings.id))?;
        info!("source started, publishing to {}_*", self.settings.topic_prefix.to_uppercase());

        let request_timeout = self.settings.request_timeout();

        while !self.stop.is_cancelled() {
            let envelope = match tokio::time::timeout(request_timeout, self.source.fetch()).await {
                Ok(Ok(envelope)) => envelope,

                Ok(Err(FetchError::NoUpdates)) => {
                    trace!("no updates");
                    tokio::task::yield_now().await;
                    continue;
                }

                Err(_) => {
                    debug!("fetch timed out after {request_timeout:?}");
                    continue;
                }

                Ok(Err(FetchError::Failed(e))) => {
                    error!("source failed: {e:#}");
                    return Err(e.context(format!("source {} failed", self.settings.id)));
                }
            };

            self.publish(&envelope).await?;
            self.pause(self.settings.polling_interval()).await;
        }

        info!("source stopped");
        Ok(())
    }

    /// Classify one envelope and publish it where it belongs
    async fn publish(&mut self, envelope: &Envelope) -> Result<()> {
        let classification = self.state.classify(envelope);

        let Some(topic) = classification.topic(&self.topics) else {
            debug!("{classification:?}: nothing published");
            return Ok(());
        };

        let message = envelope.to_json().context("failed to serialize envelope")?;
        debug!("{classification:?}: publishing to {topic}");
        trace!("data: {message}");
        self.client.publish(topic, message).await;

        Ok(())
    }

    /// Sleep between cycles, waking early on stop
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ErrorEnvelope, Status, StatusEnvelope, StatusRecord};
    use pretty_assertions::assert_eq;

    fn envelope(status: Status, at: f64) -> Envelope {
        StatusEnvelope::at("test", vec![StatusRecord::new("Job A", status)], at).into()
    }

    fn failing(at: f64) -> Envelope {
        StatusEnvelope::at(
            "test",
            vec![StatusRecord::degraded("Job A", Status::Fail, "backend down")],
            at,
        )
        .into()
    }

    #[test]
    fn test_first_envelope_is_a_change() {
        let mut state = SourceState::new(true, 60.0);
        assert_eq!(state.classify(&envelope(Status::Ok, 0.0)), Classification::Changed);
        assert!(state.last_envelope().is_some());
    }

    #[test]
    fn test_duplicate_within_heartbeat_is_suppressed() {
        let mut state = SourceState::new(true, 60.0);
        state.classify(&envelope(Status::Fail, 0.0));

        assert_eq!(
            state.classify(&envelope(Status::Fail, 5.0)),
            Classification::Duplicate { heartbeat: false }
        );
        assert_eq!(state.last_envelope(), Some(&envelope(Status::Fail, 5.0)));
    }

    #[test]
    fn test_heartbeat_measured_from_last_announcement() {
        let mut state = SourceState::new(true, 60.0);
        state.classify(&envelope(Status::Fail, 0.0));
        state.classify(&envelope(Status::Fail, 5.0));
        state.classify(&envelope(Status::Fail, 30.0));

        assert_eq!(
            state.classify(&envelope(Status::Fail, 60.0)),
            Classification::Duplicate { heartbeat: true }
        );
        assert_eq!(
            state.classify(&envelope(Status::Fail, 65.0)),
            Classification::Duplicate { heartbeat: false }
        );
        assert_eq!(
            state.classify(&envelope(Status::Fail, 120.0)),
            Classification::Duplicate { heartbeat: true }
        );
    }

    #[test]
    fn test_duplicates_published_when_not_ignored() {
        let mut state = SourceState::new(false, 60.0);
        state.classify(&envelope(Status::Ok, 0.0));
        assert_eq!(state.classify(&envelope(Status::Ok, 1.0)), Classification::Changed);
    }

    #[test]
    fn test_errors_take_precedence_over_duplicates() {
        let mut state = SourceState::new(true, 3600.0);
        assert_eq!(state.classify(&failing(0.0)), Classification::Error);
        assert_eq!(state.classify(&failing(1.0)), Classification::Error);

        let mut state = SourceState::new(true, 3600.0);
        let total = Envelope::from(ErrorEnvelope::new("test", "unreachable"));
        assert_eq!(state.classify(&total), Classification::Error);
        assert_eq!(state.classify(&total), Classification::Error);
    }

    #[test]
    fn test_empty_envelope_is_discarded_without_state_change() {
        let mut state = SourceState::new(true, 60.0);
        let empty = Envelope::from(StatusEnvelope::at("test", vec![], 0.0));

        assert_eq!(state.classify(&empty), Classification::Empty);
        assert!(state.last_envelope().is_none());
    }

    #[test]
    fn test_recovery_after_error_is_a_change() {
        let mut state = SourceState::new(true, 60.0);
        state.classify(&envelope(Status::Ok, 0.0));
        state.classify(&Envelope::from(ErrorEnvelope::new("test", "unreachable")));

        assert_eq!(state.classify(&envelope(Status::Ok, 10.0)), Classification::Changed);
    }

    #[test]
    fn test_classification_topics() {
        let topics = Topics::with_prefix("awx");
        assert_eq!(Classification::Changed.topic(&topics), Some("AWX_CHANGES"));
        assert_eq!(Classification::Error.topic(&topics), Some("AWX_ERROR"));
        assert_eq!(
            Classification::Duplicate { heartbeat: true }.topic(&topics),
            Some("AWX_INFO")
        );
        assert_eq!(Classification::Duplicate { heartbeat: false }.topic(&topics), None);
        assert_eq!(Classification::Empty.topic(&topics), None);
    }
}
