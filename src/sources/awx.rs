//! AWX job template status, answered on demand
//!
//! The source does not poll AWX on a timer. It waits on its input topic for requests
//! published by the command router and answers each one with a fresh envelope.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::actors::source::Source;
use crate::bus::BusClient;
use crate::command::StatusRequest;
use crate::config::AwxApiConfig;
use crate::envelope::{Envelope, ErrorEnvelope, Status, StatusEnvelope, StatusRecord, normalize_timestamp};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct TemplateList {
    results: Vec<JobTemplate>,
}

#[derive(Debug, Deserialize)]
struct JobTemplate {
    name: String,

    #[serde(default)]
    summary_fields: SummaryFields,
}

#[derive(Debug, Default, Deserialize)]
struct SummaryFields {
    /// Most recent first
    #[serde(default)]
    recent_jobs: Vec<RecentJob>,
}

#[derive(Debug, Deserialize)]
struct RecentJob {
    id: Option<u64>,
    status: String,
    finished: Option<String>,
}

/// Map an AWX job status onto the unified status
pub fn awx_status(raw: &str) -> Status {
    match raw {
        "successful" => Status::Ok,
        "failed" | "error" => Status::Fail,
        "canceled" => Status::Canceled,
        "running" | "pending" | "waiting" | "new" => Status::Running,
        "never updated" => Status::NoData,
        other => Status::from_raw(other),
    }
}

pub struct AwxApiSource {
    config: AwxApiConfig,

    /// HTTP client (reused across requests)
    client: reqwest::Client,

    /// Bearer token for the AWX API
    token: Option<String>,

    /// Subscribed to `topic_in`
    requests: BusClient,

    /// Request taken off `topic_in` but not answered yet
    pending: Option<Pending>,
}

/// A request whose answer was cut short by the engine timeout is retried
#[derive(Debug)]
struct Pending {
    request: StatusRequest,
    attempts: u32,
}

/// Attempts per request before it is answered with an error
const MAX_ATTEMPTS: u32 = 3;

impl AwxApiSource {
    pub fn new(config: AwxApiConfig, token: Option<String>, requests: BusClient) -> Result<Self> {
        let client = super::http_client(config.settings.request_timeout())?;
        Ok(Self {
            config,
            client,
            token,
            requests,
            pending: None,
        })
    }

    fn ui_base(&self) -> &str {
        let host = self.config.host.trim_end_matches('/');
        host.strip_suffix("/api/v2").unwrap_or(host)
    }

    /// How long one fetch may wait for a new request
    ///
    /// Leaves at least half of the request timeout for the AWX call itself.
    fn request_wait(&self) -> Duration {
        let settings = &self.config.settings;
        settings.polling_interval().min(settings.request_timeout() / 2)
    }

    #[instrument(skip(self))]
    async fn query_templates(&self, template: Option<&str>) -> Result<Vec<JobTemplate>> {
        let url = format!("{}/job_templates/", self.config.host.trim_end_matches('/'));

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(template) = template {
            request = request.query(&[("name__iexact", template)]);
        }

        let response = request.send().await.context("failed to send AWX request")?;
        if !response.status().is_success() {
            bail!("AWX answered with HTTP {}", response.status());
        }

        let list: TemplateList = response
            .json()
            .await
            .context("no `results` in /job_templates response")?;
        Ok(list.results)
    }

    /// Build the envelope answering `request`
    fn convert(&self, templates: Vec<JobTemplate>, request: &StatusRequest) -> Envelope {
        if templates.is_empty()
            && let Some(name) = &request.detail
        {
            return ErrorEnvelope::new(
                &self.config.settings.id,
                format!("No template with name '{name}' found"),
            )
            .into();
        }

        let depth = request.depth as usize;
        let status_list = templates
            .into_iter()
            .flat_map(|template| {
                let jobs = &template.summary_fields.recent_jobs;
                if jobs.is_empty() {
                    return vec![StatusRecord::new(&template.name, Status::NoData)];
                }

                jobs.iter()
                    .take(depth)
                    .map(|job| {
                        StatusRecord::new(&template.name, awx_status(&job.status))
                            .with_timestamp(job.finished.as_deref().and_then(normalize_timestamp))
                            .with_details_url(
                                job.id.map(|id| format!("{}/#/jobs/playbook/{id}", self.ui_base())),
                            )
                    })
                    .collect()
            })
            .collect();

        StatusEnvelope::new(&self.config.settings.id, status_list).into()
    }
}

#[async_trait]
impl Source for AwxApiSource {
    async fn start(&mut self) -> Result<()> {
        self.requests.subscribe(&self.config.topic_in).await;
        debug!("listening for requests on {}", self.config.topic_in);
        Ok(())
    }

    async fn fetch(&mut self) -> Result<Envelope, FetchError> {
        let id = self.config.settings.id.clone();

        let mut pending = match self.pending.take() {
            Some(pending) => {
                debug!("retrying {:?} (attempt {})", pending.request, pending.attempts + 1);
                pending
            }
            None => {
                let Some(message) = self.requests.get(self.request_wait()).await else {
                    return Err(FetchError::NoUpdates);
                };
                let request = StatusRequest::from_payload(&message.payload);
                debug!("status requested: {request:?}");
                Pending { request, attempts: 0 }
            }
        };

        pending.attempts += 1;
        if pending.attempts > MAX_ATTEMPTS {
            warn!("giving up on {:?}", pending.request);
            return Ok(ErrorEnvelope::new(
                id,
                format!("AWX did not answer within {MAX_ATTEMPTS} attempts"),
            )
            .into());
        }

        // kept until answered, a timeout drops this future before the line below
        let request = pending.request.clone();
        self.pending = Some(pending);

        let envelope = match self.query_templates(request.detail.as_deref()).await {
            Ok(templates) => self.convert(templates, &request),
            Err(e) => {
                warn!("AWX query failed: {e:#}");
                ErrorEnvelope::new(id, format!("{e:#}")).into()
            }
        };

        self.pending = None;
        Ok(envelope)
    }
}
