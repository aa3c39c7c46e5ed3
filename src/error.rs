//! Error taxonomy of the relay
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`FetchError::NoUpdates`] | sources | silent, retried next cycle |
//! | [`FetchError::Failed`] | sources | terminates that source's task |
//! | [`CommandParsingError`] | command parser | rejection reply to the operator |
//! | [`RouteError::UnknownTarget`] | command router | rejection reply to the operator |
//! | [`DeliveryError`] | sinks | logged, message dropped, runner continues |
//!
//! Fetch timeouts are not an error type of their own: the engine treats them like
//! [`FetchError::NoUpdates`].

use thiserror::Error;

/// Outcome of a `fetch()` that produced no envelope
#[derive(Debug, Error)]
pub enum FetchError {
    /// Nothing changed enough to report this cycle
    #[error("no updates")]
    NoUpdates,

    /// Unexpected failure inside the source; fatal for the source task
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Malformed operator command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CommandParsingError(pub String);

impl CommandParsingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why a command was not dispatched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Invalid command: {0}")]
    Parsing(#[from] CommandParsingError),

    #[error("Invalid source: {0}")]
    UnknownTarget(String),
}

/// Failure while rendering or delivering one message
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Payload was not a valid envelope
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] serde_json::Error),

    /// Request never reached the sink
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Sink answered with a non-success status
    #[error("sink rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Envelope could not be rendered for this sink
    #[error("failed to render message: {0}")]
    Render(String),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
