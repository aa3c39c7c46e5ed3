//! Alerta alert-management output

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::actors::output::Sink;
use crate::config::AlertaConfig;
use crate::envelope::{Envelope, StatusRecord};
use crate::error::DeliveryResult;

/// Body of `POST /alert`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub resource: String,
    pub event: String,
    pub environment: String,
    pub severity: String,
    pub service: Vec<String>,
    pub origin: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

pub struct AlertaSink {
    client: reqwest::Client,
    config: AlertaConfig,
    api_key: Option<String>,
}

impl AlertaSink {
    pub fn new(config: AlertaConfig, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_key,
        }
    }

    fn alert(&self, source: &str, event: &str, severity: &str) -> Alert {
        Alert {
            resource: format!("{}{source}", self.config.resource),
            event: event.to_string(),
            environment: self.config.environment.clone(),
            severity: severity.to_string(),
            service: self.config.service.clone(),
            origin: self.config.origin.clone(),
            value: None,
            text: None,
        }
    }

    fn record_alert(&self, source: &str, record: &StatusRecord) -> Alert {
        if !record.status.is_problem() {
            return self.alert(source, &record.name, "ok");
        }

        Alert {
            value: Some(format!("{} has status: {}", record.name, record.status)),
            text: record.error.clone(),
            ..self.alert(source, &record.name, &self.config.severity)
        }
    }

    /// One alert per record, or one for the whole source on an error envelope
    pub fn alerts(&self, envelope: &Envelope) -> Vec<Alert> {
        match envelope {
            Envelope::Status(status) => status
                .status_list
                .iter()
                .map(|record| self.record_alert(&status.source, record))
                .collect(),
            Envelope::Error(error) => vec![Alert {
                text: Some(error.error.clone()),
                ..self.alert(&error.source, &error.source, &self.config.severity)
            }],
        }
    }

    #[instrument(skip(self, alert), fields(event = %alert.event))]
    async fn send(&self, alert: &Alert) -> DeliveryResult<()> {
        let mut request = self
            .client
            .post(format!("{}/alert", self.config.endpoint.trim_end_matches('/')))
            .json(alert);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Key {key}"));
        }

        super::accepted(request.send().await?).await?;
        debug!("alert sent with severity {}", alert.severity);
        Ok(())
    }
}

#[async_trait]
impl Sink for AlertaSink {
    fn name(&self) -> &str {
        "alerta"
    }

    async fn announce(&mut self, notice: &str) -> DeliveryResult<()> {
        debug!("{notice}");
        Ok(())
    }

    async fn deliver(&mut self, _topic: &str, envelope: &Envelope) -> DeliveryResult<()> {
        for alert in self.alerts(envelope) {
            self.send(&alert).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ErrorEnvelope, Status, StatusEnvelope};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> AlertaConfig {
        AlertaConfig {
            subscriptions: vec!["INFLUX_CHANGES".into()],
            endpoint: endpoint.to_string(),
            environment: "Production".into(),
            resource: "relay-".into(),
            origin: "status-relay".into(),
            severity: "major".into(),
            service: vec!["monitoring".into()],
        }
    }

    #[test]
    fn test_severity_follows_status() {
        let sink = AlertaSink::new(config("http://alerta"), None);
        let envelope = Envelope::from(StatusEnvelope::at(
            "influx",
            vec![
                StatusRecord::new("cpu", Status::Ok),
                StatusRecord::new("disk", Status::NoData),
                StatusRecord::new("job", Status::Running),
            ],
            0.0,
        ));

        let alerts = sink.alerts(&envelope);
        let severities: Vec<_> = alerts.iter().map(|a| a.severity.as_str()).collect();
        assert_eq!(severities, vec!["ok", "major", "ok"]);
        assert_eq!(alerts[1].resource, "relay-influx");
        assert_eq!(alerts[1].value.as_deref(), Some("disk has status: no_data"));
    }

    #[test]
    fn test_error_envelope_is_one_alert() {
        let sink = AlertaSink::new(config("http://alerta"), None);
        let alerts = sink.alerts(&ErrorEnvelope::new("awx", "unreachable").into());

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event, "awx");
        assert_eq!(alerts[0].text.as_deref(), Some("unreachable"));
    }

    #[tokio::test]
    async fn test_deliver_posts_each_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/alert"))
            .and(header("Authorization", "Key secret"))
            .and(body_partial_json(serde_json::json!({"environment": "Production"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let mut sink = AlertaSink::new(config(&format!("{}/api", server.uri())), Some("secret".into()));
        let envelope = Envelope::from(StatusEnvelope::at(
            "influx",
            vec![
                StatusRecord::new("cpu", Status::Ok),
                StatusRecord::new("disk", Status::Fail),
            ],
            0.0,
        ));

        sink.deliver("INFLUX_CHANGES", &envelope).await.unwrap();
    }
}
