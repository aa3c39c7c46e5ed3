//! Discord webhook output

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use crate::actors::output::Sink;
use crate::config::DiscordConfig;
use crate::envelope::{Envelope, Status, StatusRecord};
use crate::error::DeliveryResult;
use crate::outputs::markdown::emoji;

/// Discord refuses embeds with more fields
const MAX_FIELDS: usize = 25;

const RED: u32 = 15158332;
const ORANGE: u32 = 15105570;
const GREEN: u32 = 3066993;
const LIGHT_BLUE: u32 = 5793266;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

/// Embed colour for the worst status of an envelope
fn color(records: &[StatusRecord]) -> u32 {
    if records.iter().any(|r| r.status.is_problem() || r.error.is_some()) {
        RED
    } else if records
        .iter()
        .any(|r| matches!(r.status, Status::Running | Status::Canceled))
    {
        ORANGE
    } else if records.is_empty() {
        LIGHT_BLUE
    } else {
        GREEN
    }
}

fn field(record: &StatusRecord) -> EmbedField {
    let mut value = format!("`{}` · {}", record.status, record.timestamp.as_deref().unwrap_or("n/a"));
    if let Some(url) = &record.details_url {
        value.push_str(&format!(" · [details]({url})"));
    }
    if let Some(error) = &record.error {
        value.push_str(&format!("\n{error}"));
    }

    EmbedField {
        name: format!("{} {}", emoji(record.status), record.name),
        value,
        inline: false,
    }
}

pub fn build_embed(envelope: &Envelope) -> Embed {
    let title = Some(format!("From {}", envelope.source()));
    let timestamp = Some(Utc::now().to_rfc3339());

    match envelope {
        Envelope::Status(status) => {
            let records = &status.status_list;
            let footer = (records.len() > MAX_FIELDS).then(|| EmbedFooter {
                text: format!("and {} more", records.len() - MAX_FIELDS),
            });

            Embed {
                title,
                description: None,
                color: Some(color(records)),
                fields: records.iter().take(MAX_FIELDS).map(field).collect(),
                footer,
                timestamp,
            }
        }
        Envelope::Error(error) => Embed {
            title,
            description: Some(format!("❌ {}", error.error)),
            color: Some(RED),
            fields: vec![],
            footer: None,
            timestamp,
        },
    }
}

#[derive(Debug, Clone)]
pub struct DiscordSink {
    client: Client,
    config: DiscordConfig,
}

impl DiscordSink {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// The embed, mentioning the configured user when something is wrong
    pub fn build_message(&self, envelope: &Envelope) -> Message {
        let embed = build_embed(envelope);
        let alarming = embed.color == Some(RED);

        let mut builder = MessageBuilder::new().add_embed(embed);
        if alarming && let Some(user_id) = &self.config.user_id {
            builder = builder.content(format!("<@{user_id}>"));
        }
        builder.build()
    }

    #[instrument(skip(self, message))]
    async fn send_message(&self, message: &Message) -> DeliveryResult<()> {
        let response = self.client.post(&self.config.url).json(message).send().await?;
        super::accepted(response).await?;
        info!("Successfully sent Discord message");
        Ok(())
    }
}

#[async_trait]
impl Sink for DiscordSink {
    fn name(&self) -> &str {
        "discord"
    }

    async fn announce(&mut self, notice: &str) -> DeliveryResult<()> {
        self.send_message(&MessageBuilder::new().content(notice).build()).await
    }

    async fn deliver(&mut self, _topic: &str, envelope: &Envelope) -> DeliveryResult<()> {
        self.send_message(&self.build_message(envelope)).await
    }
}
