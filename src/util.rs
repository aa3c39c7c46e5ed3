use std::fmt;

use anyhow::anyhow;

pub const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";

pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";

pub const AWX_AUTH_TOKEN: &str = "AWX_AUTH_TOKEN";

pub const INFLUX_PASSWORD: &str = "INFLUX_PASSWORD";

pub const ALERTA_API_KEY: &str = "ALERTA_API_KEY";

/// Per-deployment secrets, never read from the config file
#[derive(Clone, Default)]
pub struct Credentials {
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub awx_auth_token: Option<String>,
    pub influx_password: Option<String>,
    pub alerta_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            telegram_token: get(TELEGRAM_TOKEN),
            telegram_chat_id: get(TELEGRAM_CHAT_ID),
            awx_auth_token: get(AWX_AUTH_TOKEN),
            influx_password: get(INFLUX_PASSWORD),
            alerta_api_key: get(ALERTA_API_KEY),
        }
    }

    /// Take every value set in `overrides`
    pub fn merge(self, overrides: Credentials) -> Self {
        Self {
            telegram_token: overrides.telegram_token.or(self.telegram_token),
            telegram_chat_id: overrides.telegram_chat_id.or(self.telegram_chat_id),
            awx_auth_token: overrides.awx_auth_token.or(self.awx_auth_token),
            influx_password: overrides.influx_password.or(self.influx_password),
            alerta_api_key: overrides.alerta_api_key.or(self.alerta_api_key),
        }
    }
}

/// Fail with the variable name when a secret is missing
pub fn require<'a>(value: &'a Option<String>, name: &str) -> anyhow::Result<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| anyhow!("missing credential: set {name}"))
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("telegram_token", &redact(&self.telegram_token))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("awx_auth_token", &redact(&self.awx_auth_token))
            .field("influx_password", &redact(&self.influx_password))
            .field("alerta_api_key", &redact(&self.alerta_api_key))
            .finish()
    }
}
