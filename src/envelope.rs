//! Unified status envelope model
//!
//! Every source normalizes its poll result into one of two shapes:
//!
//! - [`StatusEnvelope`]: an ordered list of [`StatusRecord`]s plus the time the poll was taken
//! - [`ErrorEnvelope`]: a total failure of the source, carrying only an error text
//!
//! Both travel over the bus as UTF-8 JSON and are decoded by the outputs as [`Envelope`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display format used for every record timestamp
pub const DISPLAY_TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

/// State of one monitored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Fail,
    NoData,
    Running,
    Canceled,
    Alerting,

    /// Any raw value the relay does not know about
    #[serde(other)]
    Invalid,
}

impl Status {
    /// Map a raw status string, falling back to [`Status::Invalid`]
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ok" => Status::Ok,
            "fail" => Status::Fail,
            "no_data" => Status::NoData,
            "running" => Status::Running,
            "canceled" => Status::Canceled,
            "alerting" => Status::Alerting,
            _ => Status::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Fail => "fail",
            Status::NoData => "no_data",
            Status::Running => "running",
            Status::Canceled => "canceled",
            Status::Alerting => "alerting",
            Status::Invalid => "invalid",
        }
    }

    /// Whether the status should be treated as a problem by alerting sinks
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            Status::Fail | Status::NoData | Status::Alerting | Status::Invalid
        )
    }
}

impl FromStr for Status {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Status::from_raw(s))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored entity's state at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Stable identifier (job template name, metric name, ...)
    pub name: String,

    pub status: Status,

    /// Normalized display time, absent when there is no historical data
    #[serde(default)]
    pub timestamp: Option<String>,

    /// Deep link to the entity, if the back-end has one
    #[serde(default)]
    pub details_url: Option<String>,

    /// Only present for degraded or alerting records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRecord {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
            timestamp: None,
            details_url: None,
            error: None,
        }
    }

    /// Record describing a degraded entity
    pub fn degraded(name: impl Into<String>, status: Status, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(name, status)
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_details_url(mut self, details_url: Option<String>) -> Self {
        self.details_url = details_url;
        self
    }
}

/// Result of one successful source poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub source: String,
    pub status_list: Vec<StatusRecord>,

    /// Seconds since the epoch, used for heartbeat interval math
    pub message_timestamp: f64,
}

impl StatusEnvelope {
    /// Build an envelope stamped with the current wall-clock time
    pub fn new(source: impl Into<String>, status_list: Vec<StatusRecord>) -> Self {
        Self::at(source, status_list, now_timestamp())
    }

    pub fn at(source: impl Into<String>, status_list: Vec<StatusRecord>, message_timestamp: f64) -> Self {
        Self {
            source: source.into(),
            status_list,
            message_timestamp,
        }
    }
}

/// Total failure of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub source: String,
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            error: error.into(),
        }
    }
}

/// Dedup projection: `{record.name: record.status}`
pub type Projection = BTreeMap<String, Status>;

/// Any unit of work flowing through the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Status(StatusEnvelope),
    Error(ErrorEnvelope),
}

impl Envelope {
    pub fn source(&self) -> &str {
        match self {
            Envelope::Status(envelope) => &envelope.source,
            Envelope::Error(envelope) => &envelope.source,
        }
    }

    pub fn message_timestamp(&self) -> Option<f64> {
        match self {
            Envelope::Status(envelope) => Some(envelope.message_timestamp),
            Envelope::Error(_) => None,
        }
    }

    /// `status_list` present and empty: nothing to report this cycle
    pub fn is_empty(&self) -> bool {
        matches!(self, Envelope::Status(envelope) if envelope.status_list.is_empty())
    }

    /// Total failure, or any record carrying an error
    pub fn has_error(&self) -> bool {
        match self {
            Envelope::Status(envelope) => envelope.status_list.iter().any(|r| r.error.is_some()),
            Envelope::Error(_) => true,
        }
    }

    /// Projection ignoring timestamps and links; `None` for error envelopes
    pub fn projection(&self) -> Option<Projection> {
        match self {
            Envelope::Status(envelope) => Some(
                envelope
                    .status_list
                    .iter()
                    .map(|record| (record.name.clone(), record.status))
                    .collect(),
            ),
            Envelope::Error(_) => None,
        }
    }

    /// Two envelopes report the same statuses
    pub fn same_status(&self, other: &Envelope) -> bool {
        if self == other {
            return true;
        }
        match (self.projection(), other.projection()) {
            (Some(this), Some(that)) => this == that,
            _ => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<StatusEnvelope> for Envelope {
    fn from(envelope: StatusEnvelope) -> Self {
        Envelope::Status(envelope)
    }
}

impl From<ErrorEnvelope> for Envelope {
    fn from(envelope: ErrorEnvelope) -> Self {
        Envelope::Error(envelope)
    }
}

/// Current wall-clock time in seconds since the epoch
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Convert a back-end timestamp into the display format
///
/// Accepts RFC 3339 and bare `YYYY-MM-DDTHH:MM:SS[.fff]`. Anything else is passed
/// through with its fractional part cut off.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc).format(DISPLAY_TIME_FORMAT).to_string());
    }

    let without_fraction = raw.split('.').next().unwrap_or(raw);
    match NaiveDateTime::parse_from_str(without_fraction, "%Y-%m-%dT%H:%M:%S") {
        Ok(parsed) => Some(parsed.format(DISPLAY_TIME_FORMAT).to_string()),
        Err(_) => Some(without_fraction.to_string()),
    }
}

/// Format seconds since the epoch for display
pub fn format_epoch(seconds: f64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis((seconds * 1000.0) as i64)
        .map(|time| time.format(DISPLAY_TIME_FORMAT).to_string())
}
