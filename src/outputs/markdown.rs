//! Telegram MarkdownV2 rendering of envelopes

use crate::envelope::{Envelope, Status, StatusRecord};

/// Characters with a meaning in MarkdownV2 outside of code spans
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

pub fn escape_md(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Inside the `(...)` part of a link only `)` and `\` are special
fn escape_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

/// Inside `pre` and `code` entities only `` ` `` and `\` are special
fn escape_code(code: &str) -> String {
    code.replace('\\', "\\\\").replace('`', "\\`")
}

pub fn link(text: &str, url: &str) -> String {
    format!("[{}]({})", escape_md(text), escape_url(url))
}

pub fn emoji(status: Status) -> &'static str {
    match status {
        Status::Ok => "✅",
        Status::Fail => "❌",
        Status::Running => "🏃",
        Status::Canceled => "⛔",
        Status::NoData => "❔",
        Status::Alerting => "🚨",
        Status::Invalid => "",
    }
}

fn render_record(record: &StatusRecord) -> String {
    let name = escape_md(&record.name);

    let details = match &record.error {
        Some(error) => format!("{name}\n{}", escape_md(error)),
        None => {
            let timestamp = record.timestamp.as_deref().unwrap_or("n/a");
            let timestamp = match &record.details_url {
                Some(url) => link(timestamp, url),
                None => format!("`{}`", escape_code(timestamp)),
            };
            format!("{name} \\({timestamp}\\)")
        }
    };

    format!("{}  —  {details}", emoji(record.status))
}

/// Header line `*From <source>*` followed by one row per record
pub fn render(envelope: &Envelope) -> String {
    let header = format!("*From {}*", escape_md(envelope.source()));

    let body = match envelope {
        Envelope::Status(status) => status
            .status_list
            .iter()
            .map(render_record)
            .collect::<Vec<_>>()
            .join("\n"),
        Envelope::Error(error) => format!("Error: {}", escape_md(&error.error)),
    };

    format!("{header}\n{body}")
}
