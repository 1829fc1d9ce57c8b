use std::{
    fs::File,
    io::{self, BufReader},
    path::Path,
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{embed::DEFAULT_MISSING_REFERENCE_TEXT, session::ReconnectPolicy};

/// Upper bound for a rule on the essential API tier.
const MAX_RULE_LEN: usize = 512;

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub twitter_bearer_token: String,
    pub discord_webhook_url: String,
    pub twitter_filtered_stream_rule: String,
    pub deleted_reference_text: String,
    pub stream_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub discord: DiscordIdentity,
}

/// Contents of the config file. Every required field may instead come from
/// the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub twitter_bearer_token: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub twitter_filtered_stream_rule: Option<String>,
    #[serde(default = "default_deleted_reference_text")]
    pub deleted_reference_text: String,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub discord: DiscordIdentity,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

/// Webhook display overrides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordIdentity {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open config: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing `{0}` (set it in the config file or the environment)")]
    Missing(&'static str),
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

fn default_deleted_reference_text() -> String {
    DEFAULT_MISSING_REFERENCE_TEXT.to_owned()
}
fn default_stream_timeout() -> u64 {
    30
}
fn default_initial_delay() -> u64 {
    1
}
fn default_max_delay() -> u64 {
    300
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl Config {
    /// Reads `path` (a missing file is fine), applies environment overrides
    /// and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match File::open(path) {
            Ok(f) => serde_yaml::from_reader(BufReader::new(f))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => RawConfig::default_values(),
            Err(e) => return Err(e.into()),
        };

        raw.with_env(|key| std::env::var(key).ok()).validate()
    }
}

impl RawConfig {
    /// Like `Default`, but with the serde defaults filled in.
    pub fn default_values() -> Self {
        Self {
            deleted_reference_text: default_deleted_reference_text(),
            stream_timeout_secs: default_stream_timeout(),
            ..Default::default()
        }
    }

    /// Environment variables win over the file.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let fields = [
            ("TWITTER_BEARER_TOKEN", &mut self.twitter_bearer_token),
            ("DISCORD_WEBHOOK_URL", &mut self.discord_webhook_url),
            (
                "TWITTER_FILTERED_STREAM_RULE",
                &mut self.twitter_filtered_stream_rule,
            ),
        ];
        for (key, field) in fields {
            if let Some(value) = var(key).filter(|v| !v.is_empty()) {
                *field = Some(value);
            }
        }

        self
    }

    pub fn validate(self) -> Result<Config, ConfigError> {
        let twitter_bearer_token = self
            .twitter_bearer_token
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::Missing("twitter_bearer_token"))?;
        let discord_webhook_url = self
            .discord_webhook_url
            .ok_or(ConfigError::Missing("discord_webhook_url"))?;
        let rule = self
            .twitter_filtered_stream_rule
            .ok_or(ConfigError::Missing("twitter_filtered_stream_rule"))?;

        match reqwest::Url::parse(&discord_webhook_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ConfigError::Invalid {
                    field: "discord_webhook_url",
                    reason: "not an http(s) URL",
                })
            }
        }

        let rule = rule.trim().to_owned();
        if rule.is_empty() {
            return Err(ConfigError::Invalid {
                field: "twitter_filtered_stream_rule",
                reason: "rule is empty",
            });
        }
        if rule.chars().count() > MAX_RULE_LEN {
            return Err(ConfigError::Invalid {
                field: "twitter_filtered_stream_rule",
                reason: "rule is longer than 512 characters",
            });
        }

        if self.stream_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "stream_timeout_secs",
                reason: "must be positive",
            });
        }
        if self.reconnect.initial_delay_secs > self.reconnect.max_delay_secs {
            return Err(ConfigError::Invalid {
                field: "reconnect.initial_delay_secs",
                reason: "greater than reconnect.max_delay_secs",
            });
        }

        Ok(Config {
            twitter_bearer_token,
            discord_webhook_url,
            twitter_filtered_stream_rule: rule,
            deleted_reference_text: self.deleted_reference_text,
            stream_timeout: Duration::from_secs(self.stream_timeout_secs),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_secs(self.reconnect.initial_delay_secs),
                max_delay: Duration::from_secs(self.reconnect.max_delay_secs),
            },
            discord: self.discord,
        })
    }
}
