//! Concrete back-ends implementing [`crate::actors::source::Source`]

use std::time::Duration;

use anyhow::Context;

pub mod awx;
pub mod influx;
#[cfg(feature = "webhook")]
pub mod webhook;

/// HTTP client shared by all requests of one source
fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}
