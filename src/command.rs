//! Operator commands
//!
//! ```text
//! /status <source>[:<template>] [<detail-text>] [<depth>]
//! ```
//!
//! Tokens follow shell lexing rules. A detail made of several words has to be quoted:
//! an unquoted command with more than one argument after the target is rejected
//! instead of being guessed at.
//!
//! The [`CommandRouter`] never waits for the answer. It publishes the request on the
//! target's input topic, and the reply arrives later on the target's regular topics.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::bus::BusClient;
use crate::error::{CommandParsingError, RouteError};

/// Name of the only command the router understands
pub const STATUS_COMMAND: &str = "status";

/// Depth used when the command does not name one
pub const DEFAULT_DEPTH: u32 = 1;

/// Most jobs a single command may ask for
pub const MAX_DEPTH: u32 = 20;

/// `/status` or `/status@SomeBot`
static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?P<name>[A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?$")
        .expect("Failed to compile command pattern")
});

/// A parsed `/status` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusQuery {
    /// Topic prefix of the source to ask
    pub target: String,

    /// Free-text filter passed through to the source
    pub detail: Option<String>,

    pub depth: u32,
}

impl StatusQuery {
    /// Body published on the target's input topic
    pub fn payload(&self) -> String {
        StatusRequest {
            detail: self.detail.clone(),
            depth: self.depth,
        }
        .to_payload()
    }
}

/// A request as received by a source on its input topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRequest {
    pub detail: Option<String>,
    pub depth: u32,
}

impl Default for StatusRequest {
    fn default() -> Self {
        Self {
            detail: None,
            depth: DEFAULT_DEPTH,
        }
    }
}

impl StatusRequest {
    /// Decode `"<detail>;<depth>"` or a bare `"<detail>"`
    pub fn from_payload(payload: &str) -> Self {
        let (detail, depth) = match payload.rsplit_once(';') {
            Some((detail, depth)) => {
                let depth = match depth.trim().parse::<u32>() {
                    Ok(depth) if depth > MAX_DEPTH => {
                        warn!("depth in request {payload:?} capped at {MAX_DEPTH}");
                        MAX_DEPTH
                    }
                    Ok(depth) if depth > 0 => depth,
                    _ => {
                        warn!("invalid depth in request {payload:?}, using {DEFAULT_DEPTH}");
                        DEFAULT_DEPTH
                    }
                };
                (detail, depth)
            }
            None => (payload, DEFAULT_DEPTH),
        };

        let detail = detail.trim();
        Self {
            detail: (!detail.is_empty()).then(|| detail.to_string()),
            depth,
        }
    }

    pub fn to_payload(&self) -> String {
        format!("{};{}", self.detail.as_deref().unwrap_or_default(), self.depth)
    }
}

/// Parse a `/status` command
pub fn parse_command(message: &str) -> Result<StatusQuery, CommandParsingError> {
    debug!("parsing command: {message}");

    let tokens = shlex::split(message)
        .ok_or_else(|| CommandParsingError::new(format!("Unbalanced quoting in command: {message}")))?;
    let mut tokens = tokens.into_iter();

    let command = tokens
        .next()
        .ok_or_else(|| CommandParsingError::new("Empty command"))?;
    let name = COMMAND_PATTERN
        .captures(&command)
        .and_then(|captures| captures.name("name"))
        .map(|name| name.as_str().to_string())
        .ok_or_else(|| CommandParsingError::new(format!("Not a command: {command}")))?;
    if name != STATUS_COMMAND {
        return Err(CommandParsingError::new(format!("Unknown command: /{name}")));
    }

    let target = tokens
        .next()
        .ok_or_else(|| CommandParsingError::new(format!("Command {command} requires a target source")))?;
    let args: Vec<String> = tokens.collect();

    let quoted = message.contains('\'') || message.contains('"');
    if !quoted && args.len() > 1 {
        return Err(CommandParsingError::new(format!(
            "Invalid syntax command arguments: {message} (quote details containing spaces)"
        )));
    }
    if args.len() > 2 {
        return Err(CommandParsingError::new(format!(
            "Command {command} got unexpected arguments: {:?}",
            &args[2..]
        )));
    }

    let (target, template) = match target.split_once(':') {
        Some((target, template)) => (target.to_string(), Some(template.to_string())),
        None => (target, None),
    };
    if target.is_empty() {
        return Err(CommandParsingError::new(format!(
            "Command {command} requires a target source"
        )));
    }
    let template = template.filter(|template| !template.is_empty());

    let mut args = args.into_iter();
    let detail = match (template, args.next()) {
        (Some(_), Some(_)) => {
            return Err(CommandParsingError::new(
                "Template given both as <source>:<template> and as detail argument",
            ));
        }
        (template, detail) => template.or(detail),
    };

    let depth = match args.next() {
        None => DEFAULT_DEPTH,
        Some(raw) => match raw.parse::<u32>() {
            Ok(0) => {
                return Err(CommandParsingError::new("Depth must be a positive integer"));
            }
            Ok(depth) if depth > MAX_DEPTH => {
                return Err(CommandParsingError::new(format!(
                    "Depth must not exceed {MAX_DEPTH}, got {depth}"
                )));
            }
            Ok(depth) => depth,
            Err(_) => {
                return Err(CommandParsingError::new(format!("Invalid depth value: {raw}")));
            }
        },
    };

    Ok(StatusQuery {
        target: target.to_lowercase(),
        detail,
        depth,
    })
}

/// Dispatches parsed commands to the input topics of on-demand sources
pub struct CommandRouter {
    client: BusClient,

    /// Target identifier (lowercase topic prefix) → input topic
    targets: HashMap<String, String>,
}

impl CommandRouter {
    pub fn new(client: BusClient) -> Self {
        Self {
            client,
            targets: HashMap::new(),
        }
    }

    /// Make `target` addressable; its requests go to `topic_in`
    pub fn register(mut self, target: &str, topic_in: impl Into<String>) -> Self {
        self.targets.insert(target.to_lowercase(), topic_in.into());
        self
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// Parse and dispatch a command without waiting for the answer
    #[instrument(skip(self))]
    pub async fn route(&self, text: &str) -> Result<StatusQuery, RouteError> {
        let query = parse_command(text)?;

        let Some(topic_in) = self.targets.get(&query.target) else {
            debug!("rejecting command for unknown target {}", query.target);
            return Err(RouteError::UnknownTarget(query.target));
        };

        self.client.publish(topic_in, query.payload()).await;
        debug!("dispatched {query:?} to {topic_in}");

        Ok(query)
    }
}
