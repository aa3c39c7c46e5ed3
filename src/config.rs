use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::trace;

use crate::bus::Topics;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub outputs: OutputsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    /// On-demand AWX job template status
    pub awx_api: Option<AwxApiConfig>,

    /// AWX notification webhook receiver
    pub awx_webhook: Option<AwxWebhookConfig>,

    /// InfluxDB freshness checks, one source per entry
    #[serde(default)]
    pub influxdb: Vec<InfluxConfig>,
}

/// Settings shared by every source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    /// Value of the envelope `source` field
    pub id: String,

    /// Prefix of the `_CHANGES`/`_INFO`/`_ERROR` topics, also the command target name
    pub topic_prefix: String,

    /// Seconds between cycles
    #[serde(default = "default_polling_interval")]
    pub polling_interval: f64,

    /// Maximum seconds a single fetch may run
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,

    /// Maximum silence in seconds before an unchanged status is re-announced
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: f64,

    /// Unset means "use the default of the source kind"
    #[serde(default)]
    pub ignore_duplicates: Option<bool>,
}

impl SourceSettings {
    pub fn new(id: impl Into<String>, topic_prefix: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_prefix: topic_prefix.into(),
            polling_interval: default_polling_interval(),
            request_timeout: default_request_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
            ignore_duplicates: None,
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::with_prefix(&self.topic_prefix)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs_f64(self.polling_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout)
    }

    pub fn ignores_duplicates(&self) -> bool {
        self.ignore_duplicates.unwrap_or(true)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            bail!("source id must not be empty");
        }
        if self.topic_prefix.trim().is_empty() {
            bail!("{}: topic_prefix must not be empty", self.id);
        }
        for (name, value) in [
            ("polling_interval", self.polling_interval),
            ("request_timeout", self.request_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
        ] {
            if !value.is_finite() || value <= 0.0 {
                bail!("{}: {name} must be a positive number of seconds, got {value}", self.id);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwxApiConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,

    /// API root, e.g. `https://awx.example.com/api/v2`
    pub host: String,

    /// Topic the source reads on-demand requests from
    pub topic_in: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwxWebhookConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,

    #[serde(default = "default_webhook_listen")]
    pub listen: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    #[serde(flatten)]
    pub settings: SourceSettings,

    /// Base URL, e.g. `https://influx.example.com:8086`
    pub url: String,
    pub username: String,
    pub database: String,
    pub metrics: Vec<MetricConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    pub name: String,

    /// InfluxQL query; rows must be `[time, value?]`, `{entity}` is replaced by `metric_id`
    pub query: String,

    /// Substituted for `{entity}` in `query`
    #[serde(default)]
    pub metric_id: Option<String>,

    /// Tag naming each series; set it to get one record per series (per server, per host)
    #[serde(default)]
    pub tag: Option<String>,

    /// Seconds after which the last point counts as stale
    #[serde(default = "default_metric_timeout")]
    pub timeout: u64,

    /// Values above this raise an alerting record
    pub threshold: Option<f64>,

    /// Consecutive checks a value must stay above `threshold` before alerting
    #[serde(default = "default_window")]
    pub window: usize,
}

impl MetricConfig {
    /// The query with `metric_id` filled in
    pub fn resolved_query(&self) -> String {
        match &self.metric_id {
            Some(id) => self.query.replace("{entity}", id),
            None => self.query.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputsConfig {
    pub telegram: Option<TelegramConfig>,
    pub alerta: Option<AlertaConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub subscriptions: Vec<String>,

    #[serde(default = "default_telegram_api")]
    pub api_url: String,

    /// Accept `/status` commands from the chat
    #[serde(default = "default_true")]
    pub commands: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertaConfig {
    pub subscriptions: Vec<String>,

    /// API root, e.g. `https://alerta.example.com/api`
    pub endpoint: String,

    #[serde(default = "default_alerta_environment")]
    pub environment: String,

    /// Prepended to the envelope source to form the alert resource
    #[serde(default)]
    pub resource: String,

    #[serde(default = "default_alerta_origin")]
    pub origin: String,

    /// Severity of problem records
    #[serde(default = "default_alerta_severity")]
    pub severity: String,

    #[serde(default)]
    pub service: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub subscriptions: Vec<String>,
    pub url: String,
    pub user_id: Option<String>,
}

fn default_polling_interval() -> f64 {
    30.0
}

fn default_request_timeout() -> f64 {
    30.0
}

fn default_heartbeat_interval() -> f64 {
    3600.0
}

fn default_metric_timeout() -> u64 {
    300
}

fn default_window() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_webhook_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 23834))
}

fn default_telegram_api() -> String {
    String::from("https://api.telegram.org")
}

fn default_alerta_environment() -> String {
    String::from("Production")
}

fn default_alerta_origin() -> String {
    String::from("status-relay")
}

fn default_alerta_severity() -> String {
    String::from("major")
}

impl Config {
    /// Settings of every configured source
    pub fn source_settings(&self) -> Vec<&SourceSettings> {
        let mut settings = vec![];
        if let Some(awx) = &self.sources.awx_api {
            settings.push(&awx.settings);
        }
        if let Some(webhook) = &self.sources.awx_webhook {
            settings.push(&webhook.settings);
        }
        settings.extend(self.sources.influxdb.iter().map(|influx| &influx.settings));
        settings
    }

    /// Fill in defaults that depend on the source kind
    fn resolve(mut self) -> Self {
        // on-demand answers are always wanted, even if unchanged
        if let Some(awx) = &mut self.sources.awx_api {
            awx.settings.ignore_duplicates.get_or_insert(false);
        }
        if let Some(webhook) = &mut self.sources.awx_webhook {
            webhook.settings.ignore_duplicates.get_or_insert(false);
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut prefixes = HashSet::new();
        for settings in self.source_settings() {
            settings.validate()?;
            if !prefixes.insert(settings.topic_prefix.to_uppercase()) {
                bail!("topic_prefix {} is used by more than one source", settings.topic_prefix);
            }
        }

        for influx in &self.sources.influxdb {
            if influx.metrics.is_empty() {
                bail!("{}: at least one metric is required", influx.settings.id);
            }
            if let Some(metric) = influx.metrics.iter().find(|metric| metric.window == 0) {
                bail!("{}: metric {} needs a window of at least 1", influx.settings.id, metric.name);
            }
        }

        #[cfg(not(feature = "webhook"))]
        if let Some(webhook) = &self.sources.awx_webhook {
            bail!(
                "{}: sources.awx_webhook is configured but this build has no webhook support",
                webhook.settings.id
            );
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config = toml::from_str::<Config>(content)
        .context("Invalid configuration file provided!")?
        .resolve();
    config.validate()?;
    Ok(config)
}

pub fn read_config_file(path: &Path) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&file_content)
        .with_context(|| format!("Failed to load config file: {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// `~/.config/status-relay/config.toml`, if a home directory is known
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/status-relay/config.toml"))
}
