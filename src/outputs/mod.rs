//! Concrete sinks implementing [`crate::actors::output::Sink`]

use crate::error::{DeliveryError, DeliveryResult};

pub mod alerta;
pub mod discord;
pub mod markdown;
pub mod telegram;

/// Turn a non-success answer into [`DeliveryError::Rejected`]
async fn accepted(response: reqwest::Response) -> DeliveryResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        body,
    })
}
