use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::Parser;
use futures::future::{BoxFuture, FutureExt, join_all};
use status_relay::{
    MessageBus, OutputRunner, SourceActor,
    command::CommandRouter,
    config::{Config, default_config_path, read_config_file},
    outputs::{
        alerta::AlertaSink,
        discord::DiscordSink,
        telegram::{CommandListener, TelegramBot, TelegramOutput, TelegramSink},
    },
    sources::{awx::AwxApiSource, influx::InfluxSource},
    util::{self, Credentials},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Grace period between starting outputs and starting sources
const OUTPUT_STARTUP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (defaults to ~/.config/status-relay/config.toml)
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_name = "TOKEN")]
    telegram_token: Option<String>,

    #[arg(long, value_name = "ID")]
    telegram_chat_id: Option<String>,

    #[arg(long, value_name = "TOKEN")]
    awx_auth_token: Option<String>,

    #[arg(long, value_name = "PASSWORD")]
    influx_password: Option<String>,

    #[arg(long, value_name = "KEY")]
    alerta_api_key: Option<String>,
}

impl Args {
    fn credentials(&self) -> Credentials {
        Credentials {
            telegram_token: self.telegram_token.clone(),
            telegram_chat_id: self.telegram_chat_id.clone(),
            awx_auth_token: self.awx_auth_token.clone(),
            influx_password: self.influx_password.clone(),
            alerta_api_key: self.alerta_api_key.clone(),
        }
    }
}

type Task = (String, BoxFuture<'static, anyhow::Result<()>>);

/// Library and binary both log under `status_relay`, dependencies stay quiet
fn log_filter(verbose: u8) -> filter::Targets {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    filter::Targets::new().with_target("status_relay", level)
}

fn init(verbose: u8) {
    let filter = log_filter(verbose);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {:?}", args.file);

    let path = args
        .file
        .clone()
        .or_else(default_config_path)
        .ok_or_else(|| anyhow!("no config file given and no home directory found"))?;
    let config = read_config_file(&path)?;
    let credentials = Credentials::from_env().merge(args.credentials());
    trace!("credentials: {credentials:?}");

    let bus = MessageBus::new();
    let stop = CancellationToken::new();

    let outputs = spawn_all(build_outputs(&config, &credentials, &bus, &stop)?);
    tokio::time::sleep(OUTPUT_STARTUP).await;
    let sources = spawn_all(build_sources(&config, &credentials, &bus, &stop)?);
    info!("relay running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("stopping");
    stop.cancel();

    let results = join_all(sources.into_iter().chain(outputs)).await;
    for (name, result) in results {
        match result {
            Ok(Ok(())) => trace!("{name} finished"),
            Ok(Err(e)) => error!("{name} ended with error: {e:#}"),
            Err(e) => error!("{name} panicked: {e}"),
        }
    }

    Ok(())
}

fn spawn_all(
    tasks: Vec<Task>,
) -> Vec<impl Future<Output = (String, Result<anyhow::Result<()>, tokio::task::JoinError>)>> {
    tasks
        .into_iter()
        .map(|(name, task)| {
            let handle = tokio::spawn(task);
            async move { (name, handle.await) }
        })
        .collect()
}

fn build_outputs(
    config: &Config,
    credentials: &Credentials,
    bus: &MessageBus,
    stop: &CancellationToken,
) -> anyhow::Result<Vec<Task>> {
    let mut tasks: Vec<Task> = vec![];

    if let Some(telegram) = &config.outputs.telegram {
        let token = util::require(&credentials.telegram_token, util::TELEGRAM_TOKEN)?;
        let chat_id = util::require(&credentials.telegram_chat_id, util::TELEGRAM_CHAT_ID)?;
        let bot = TelegramBot::new(&telegram.api_url, token, chat_id);

        let runner = OutputRunner::new(
            TelegramSink::new(bot.clone()),
            bus.client(),
            telegram.subscriptions.clone(),
            stop.clone(),
        );
        let listener = telegram.commands.then(|| {
            let mut router = CommandRouter::new(bus.client());
            if let Some(awx) = &config.sources.awx_api {
                router = router.register(&awx.settings.topic_prefix, &awx.topic_in);
            }
            CommandListener::new(bot, router, stop.clone())
        });

        tasks.push(("telegram".into(), TelegramOutput { runner, listener }.run().boxed()));
    }

    if let Some(alerta) = &config.outputs.alerta {
        let sink = AlertaSink::new(alerta.clone(), credentials.alerta_api_key.clone());
        let runner = OutputRunner::new(sink, bus.client(), alerta.subscriptions.clone(), stop.clone());
        tasks.push(("alerta".into(), runner.run().boxed()));
    }

    if let Some(discord) = &config.outputs.discord {
        let sink = DiscordSink::new(discord.clone());
        let runner = OutputRunner::new(sink, bus.client(), discord.subscriptions.clone(), stop.clone());
        tasks.push(("discord".into(), runner.run().boxed()));
    }

    Ok(tasks)
}

fn build_sources(
    config: &Config,
    credentials: &Credentials,
    bus: &MessageBus,
    stop: &CancellationToken,
) -> anyhow::Result<Vec<Task>> {
    let mut tasks: Vec<Task> = vec![];

    if let Some(awx) = &config.sources.awx_api {
        let source = AwxApiSource::new(awx.clone(), credentials.awx_auth_token.clone(), bus.client())?;
        let actor = SourceActor::new(source, awx.settings.clone(), bus.client(), stop.clone());
        tasks.push((awx.settings.id.clone(), actor.run().boxed()));
    }

    #[cfg(feature = "webhook")]
    if let Some(webhook) = &config.sources.awx_webhook {
        use status_relay::sources::webhook::WebhookSource;

        let source = WebhookSource::new(webhook.clone(), stop.clone());
        let actor = SourceActor::new(source, webhook.settings.clone(), bus.client(), stop.clone());
        tasks.push((webhook.settings.id.clone(), actor.run().boxed()));
    }

    for influx in &config.sources.influxdb {
        let source = InfluxSource::new(influx.clone(), credentials.influx_password.clone())?;
        let actor = SourceActor::new(source, influx.settings.clone(), bus.client(), stop.clone());
        tasks.push((influx.settings.id.clone(), actor.run().boxed()));
    }

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_log_filter_covers_only_this_crate() {
        let filter = log_filter(0);
        assert!(filter.would_enable("status_relay::sources::awx", &Level::INFO));
        assert!(!filter.would_enable("status_relay", &Level::DEBUG));
        assert!(!filter.would_enable("relay", &Level::INFO));
        assert!(!filter.would_enable("reqwest::connect", &Level::INFO));

        let filter = log_filter(2);
        assert!(filter.would_enable("status_relay::bus", &Level::TRACE));
        assert!(!filter.would_enable("hyper", &Level::ERROR));
    }
}
