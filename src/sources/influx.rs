//! InfluxDB 1.x metric freshness and threshold checks
//!
//! A metric yields one record, or with `tag` set one record per returned series.
//! Thresholds are judged over a rolling window of fresh values kept per series, so a
//! single spike does not alert when `window` is larger than one.

use std::collections::{HashMap, VecDeque};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::actors::source::Source;
use crate::config::{InfluxConfig, MetricConfig};
use crate::envelope::{Envelope, Status, StatusEnvelope, StatusRecord, format_epoch, now_timestamp};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    tags: HashMap<String, String>,

    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// The most recent values of one series
#[derive(Debug, Clone)]
pub struct Window {
    values: VecDeque<f64>,
    size: usize,
}

impl Window {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            values: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Full, and every value in it above `threshold`
    pub fn sustained_above(&self, threshold: f64) -> bool {
        self.values.len() == self.size && self.values.iter().all(|value| *value > threshold)
    }
}

/// Turn the newest point of a series into a status record
///
/// `row` is `[time, value?]` with `time` in epoch seconds. Only fresh numeric values
/// enter `window`.
pub fn evaluate_point(
    metric: &MetricConfig,
    name: &str,
    row: Option<&[Value]>,
    window: &mut Window,
    now: f64,
) -> StatusRecord {
    let Some(row) = row else {
        return StatusRecord::new(name, Status::NoData);
    };

    let Some(time) = row.first().and_then(Value::as_f64) else {
        return StatusRecord::degraded(name, Status::Fail, "unexpected time column in result");
    };
    let timestamp = format_epoch(time);

    if now - time > metric.timeout as f64 {
        return StatusRecord::new(name, Status::Fail).with_timestamp(timestamp);
    }

    if let Some(value) = row.get(1).and_then(Value::as_f64) {
        window.push(value);

        if let Some(threshold) = metric.threshold
            && window.sustained_above(threshold)
        {
            let error = match metric.window {
                0 | 1 => format!("value {value} exceeds threshold {threshold}"),
                checks => format!("above threshold {threshold} for the last {checks} checks, now {value}"),
            };
            return StatusRecord::degraded(name, Status::Alerting, error).with_timestamp(timestamp);
        }
    }

    StatusRecord::new(name, Status::Ok).with_timestamp(timestamp)
}

pub struct InfluxSource {
    config: InfluxConfig,
    client: reqwest::Client,
    password: Option<String>,

    /// Keyed by metric position and record name
    windows: HashMap<(usize, String), Window>,
}

impl InfluxSource {
    pub fn new(config: InfluxConfig, password: Option<String>) -> Result<Self> {
        let client = super::http_client(config.settings.request_timeout())?;
        Ok(Self {
            config,
            client,
            password,
            windows: HashMap::new(),
        })
    }

    /// Series of the first statement
    #[instrument(skip(self))]
    async fn query(&self, query: &str) -> Result<Vec<Series>> {
        let url = format!("{}/query", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, self.password.as_deref())
            .query(&[
                ("db", self.config.database.as_str()),
                ("q", query),
                ("epoch", "s"),
            ])
            .send()
            .await
            .context("failed to send query")?;

        if !response.status().is_success() {
            bail!("InfluxDB answered with HTTP {}", response.status());
        }

        let body: QueryResponse = response.json().await.context("malformed query response")?;
        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty query response"))?;

        if let Some(error) = result.error {
            bail!("query rejected: {error}");
        }

        Ok(result.series)
    }

    /// Records for one metric from its query result
    fn evaluate(
        &mut self,
        index: usize,
        metric: &MetricConfig,
        result: Result<Vec<Series>>,
        now: f64,
    ) -> Vec<StatusRecord> {
        let series = match result {
            Ok(series) => series,
            Err(e) => {
                warn!("metric {} failed: {e:#}", metric.name);
                return vec![StatusRecord::degraded(&metric.name, Status::Fail, format!("{e:#}"))];
            }
        };

        let named: Vec<(String, Option<Vec<Value>>)> = match &metric.tag {
            None => vec![(
                metric.name.clone(),
                series.into_iter().next().and_then(|s| s.values.into_iter().next()),
            )],
            Some(_) if series.is_empty() => vec![(metric.name.clone(), None)],
            Some(tag) => series
                .into_iter()
                .map(|mut s| {
                    let name = match s.tags.remove(tag) {
                        Some(value) => format!("{}: {value}", metric.name),
                        None => {
                            warn!("metric {}: series without tag {tag}", metric.name);
                            metric.name.clone()
                        }
                    };
                    (name, s.values.into_iter().next())
                })
                .collect(),
        };

        named
            .into_iter()
            .map(|(name, row)| {
                let window = self
                    .windows
                    .entry((index, name.clone()))
                    .or_insert_with(|| Window::new(metric.window));
                evaluate_point(metric, &name, row.as_deref(), window, now)
            })
            .collect()
    }
}

#[async_trait]
impl Source for InfluxSource {
    async fn fetch(&mut self) -> Result<Envelope, FetchError> {
        let metrics = self.config.metrics.clone();
        let queries: Vec<String> = metrics.iter().map(MetricConfig::resolved_query).collect();
        let results = join_all(queries.iter().map(|query| self.query(query))).await;

        let now = now_timestamp();
        let status_list: Vec<_> = metrics
            .iter()
            .zip(results)
            .enumerate()
            .flat_map(|(index, (metric, result))| self.evaluate(index, metric, result, now))
            .collect();

        debug!("checked {} metrics, {} records", metrics.len(), status_list.len());
        Ok(StatusEnvelope::new(&self.config.settings.id, status_list).into())
    }
}
