//! Test helpers shared by the integration tests

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use status_relay::{
    BusClient, BusMessage, Envelope, FetchError, Source, Status, StatusEnvelope, StatusRecord,
    config::SourceSettings,
};

/// One scripted fetch outcome
pub enum Step {
    Emit(Envelope),
    Fail(&'static str),

    /// Block longer than any test request timeout
    Stall,
}

/// Source replaying a fixed script, then reporting no updates forever
pub struct ScriptedSource {
    steps: VecDeque<Step>,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn fetch(&mut self) -> Result<Envelope, FetchError> {
        match self.steps.pop_front() {
            Some(Step::Emit(envelope)) => Ok(envelope),
            Some(Step::Fail(reason)) => Err(FetchError::Failed(anyhow::anyhow!(reason))),
            Some(Step::Stall) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(FetchError::NoUpdates)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(FetchError::NoUpdates)
            }
        }
    }
}

/// Fast-cycling settings for prefix `test`
pub fn fast_settings(ignore_duplicates: bool, heartbeat_interval: f64) -> SourceSettings {
    let mut settings = SourceSettings::new("test_source", "test");
    settings.polling_interval = 0.01;
    settings.request_timeout = 0.2;
    settings.heartbeat_interval = heartbeat_interval;
    settings.ignore_duplicates = Some(ignore_duplicates);
    settings
}

pub fn single(status: Status, at: f64) -> Envelope {
    StatusEnvelope::at("test_source", vec![StatusRecord::new("Job A", status)], at).into()
}

pub fn with_error(at: f64) -> Envelope {
    StatusEnvelope::at(
        "test_source",
        vec![StatusRecord::degraded("Job A", Status::Fail, "backend unreachable")],
        at,
    )
    .into()
}

/// Drain everything arriving within `window`
pub async fn collect(client: &mut BusClient, window: Duration) -> Vec<BusMessage> {
    let deadline = tokio::time::Instant::now() + window;
    let mut messages = vec![];
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match client.get(remaining).await {
            Some(message) => messages.push(message),
            None => break,
        }
    }
    messages
}

pub fn topics_of(messages: &[BusMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.topic.as_str()).collect()
}
