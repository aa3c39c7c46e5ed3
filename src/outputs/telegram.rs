//! Telegram chat output with an embedded `/status` command listener
//!
//! ```text
//!             ┌──────────────────────┐
//!  bus ──────►│ OutputRunner         │──sendMessage──► chat
//!             │   TelegramSink       │
//!             └──────────────────────┘
//!             ┌──────────────────────┐
//!  chat ─────►│ CommandListener      │──route()──► <source topic_in>
//!  getUpdates │   CommandRouter      │──rejection──► chat
//!             └──────────────────────┘
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actors::output::{OutputRunner, Sink};
use crate::bus::TopicKind;
use crate::command::{CommandRouter, STATUS_COMMAND};
use crate::envelope::Envelope;
use crate::error::DeliveryResult;
use crate::outputs::markdown::{escape_md, render};

/// Long-poll duration passed to `getUpdates`
const LONG_POLL_SECS: u64 = 10;

/// Pause after a failed `getUpdates` call
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Thin Bot API client
#[derive(Debug, Clone)]
pub struct TelegramBot {
    client: reqwest::Client,

    /// `<api_url>/bot<token>`
    base: String,

    /// Chat receiving every notification
    chat_id: String,
}

impl TelegramBot {
    pub fn new(api_url: &str, token: &str, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
            chat_id: chat_id.into(),
        }
    }

    /// Send MarkdownV2 text to the configured chat
    pub async fn notify(&self, text: &str, silent: bool) -> DeliveryResult<()> {
        self.send_message(&self.chat_id, text, silent).await
    }

    #[instrument(skip(self, text))]
    pub async fn send_message(&self, chat_id: &str, text: &str, silent: bool) -> DeliveryResult<()> {
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "MarkdownV2",
                "disable_notification": silent,
            }))
            .send()
            .await?;
        super::accepted(response).await?;
        debug!("message sent to chat {chat_id}");
        Ok(())
    }

    /// Fetch updates after `offset`, waiting up to `wait_secs` on the server side
    pub async fn get_updates(&self, offset: Option<i64>, wait_secs: u64) -> DeliveryResult<Vec<Update>> {
        let mut query = vec![("timeout", wait_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/getUpdates", self.base))
            .query(&query)
            .timeout(Duration::from_secs(wait_secs + 10))
            .send()
            .await?;
        let body: ApiResponse<Vec<Update>> = super::accepted(response).await?.json().await?;
        Ok(body.result.unwrap_or_default())
    }
}

/// Chat sink; INFO traffic and notices are delivered without notification
pub struct TelegramSink {
    bot: TelegramBot,
}

impl TelegramSink {
    pub fn new(bot: TelegramBot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn announce(&mut self, notice: &str) -> DeliveryResult<()> {
        self.bot.notify(&format!("_{}_", escape_md(notice)), true).await
    }

    async fn deliver(&mut self, topic: &str, envelope: &Envelope) -> DeliveryResult<()> {
        let silent = TopicKind::of(topic) == TopicKind::Info;
        self.bot.notify(&render(envelope), silent).await
    }
}

/// Whether `text` invokes the status command, optionally addressed as `/status@bot`
pub fn is_status_command(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .and_then(|command| command.strip_prefix('/'))
        .and_then(|command| command.split('@').next())
        .is_some_and(|name| name == STATUS_COMMAND)
}

/// Feeds chat commands into the router
pub struct CommandListener {
    bot: TelegramBot,
    router: CommandRouter,
    stop: CancellationToken,

    /// Next update to ask for
    offset: Option<i64>,
}

impl CommandListener {
    pub fn new(bot: TelegramBot, router: CommandRouter, stop: CancellationToken) -> Self {
        Self {
            bot,
            router,
            stop,
            offset: None,
        }
    }

    #[instrument(skip(self), name = "command_listener")]
    pub async fn run(mut self) -> Result<()> {
        info!("accepting commands for: {:?}", self.router.targets().collect::<Vec<_>>());

        while !self.stop.is_cancelled() {
            let updates = tokio::select! {
                updates = self.bot.get_updates(self.offset, LONG_POLL_SECS) => updates,
                _ = self.stop.cancelled() => break,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        self.handle(update).await;
                    }
                }
                Err(e) => {
                    warn!("failed to fetch updates: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = self.stop.cancelled() => {}
                    }
                }
            }
        }

        info!("command listener stopped");
        Ok(())
    }

    /// Route one update, replying with the rejection text on failure
    pub async fn handle(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.as_deref().filter(|text| is_status_command(text)) else {
            return;
        };

        debug!("command received in chat {}: {text}", message.chat.id);
        if let Err(rejection) = self.router.route(text).await {
            let reply = escape_md(&rejection.to_string());
            if let Err(e) = self.bot.send_message(&message.chat.id.to_string(), &reply, false).await {
                warn!("failed to send rejection: {e}");
            }
        }
    }
}

/// The chat output: notification runner plus optional command listener
pub struct TelegramOutput {
    pub runner: OutputRunner<TelegramSink>,
    pub listener: Option<CommandListener>,
}

impl TelegramOutput {
    pub async fn run(self) -> Result<()> {
        match self.listener {
            Some(listener) => {
                tokio::try_join!(self.runner.run(), listener.run())?;
            }
            None => self.runner.run().await?,
        }
        Ok(())
    }
}
