use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct DiscordClient {
    webhook_url: String,
    username: Option<String>,
    avatar_url: Option<String>,
    http: Client,
}
#[derive(Debug, Error)]
pub enum DiscordError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Scheme(#[from] serde_json::Error),
    #[error("webhook returned error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("ratelimited for {} seconds", .timeout.as_secs_f32())]
    RateLimited { timeout: Duration },
}

/// One block of a webhook message.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    embeds: &'a [Embed],
}

#[derive(Deserialize)]
struct DiscordErrorBody {
    #[serde(default)]
    message: String,
    /// Seconds, fractional.
    #[serde(default)]
    retry_after: Option<f32>,
}

/// Sends all blocks of one message in a single request.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(&self, embeds: &[Embed]) -> Result<(), DiscordError>;
}

/// Logs payloads instead of posting them.
pub struct DryRun;

impl DiscordClient {
    pub fn new(webhook_url: String) -> Result<Self, DiscordError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            webhook_url,
            username: None,
            avatar_url: None,
            http,
        })
    }

    /// Overrides the webhook's display name and avatar.
    pub fn with_identity(mut self, username: Option<String>, avatar_url: Option<String>) -> Self {
        self.username = username;
        self.avatar_url = avatar_url;

        self
    }

    fn payload<'a>(&'a self, embeds: &'a [Embed]) -> WebhookPayload<'a> {
        WebhookPayload {
            username: self.username.as_deref(),
            avatar_url: self.avatar_url.as_deref(),
            embeds,
        }
    }
}

#[async_trait]
impl Delivery for DiscordClient {
    async fn send(&self, embeds: &[Embed]) -> Result<(), DiscordError> {
        let res = self
            .http
            .post(&self.webhook_url)
            .query(&[("wait", "true")])
            .json(&self.payload(embeds))
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        Err(error_from_response(status, res.text().await?))
    }
}

/// A 429 becomes `RateLimited` only when `retry_after` is a usable duration.
fn error_from_response(status: StatusCode, body: String) -> DiscordError {
    let err = serde_json::from_str(&body).unwrap_or(DiscordErrorBody {
        message: body,
        retry_after: None,
    });

    let retry_after = err
        .retry_after
        .and_then(|secs| Duration::try_from_secs_f32(secs.max(0.0)).ok());
    match (status, retry_after) {
        (StatusCode::TOO_MANY_REQUESTS, Some(timeout)) => DiscordError::RateLimited { timeout },
        _ => DiscordError::Server {
            status: status.as_u16(),
            message: err.message,
        },
    }
}

#[async_trait]
impl<T: Delivery + ?Sized> Delivery for Box<T> {
    async fn send(&self, embeds: &[Embed]) -> Result<(), DiscordError> {
        (**self).send(embeds).await
    }
}

#[async_trait]
impl Delivery for DryRun {
    async fn send(&self, embeds: &[Embed]) -> Result<(), DiscordError> {
        let payload = serde_json::to_string(&WebhookPayload {
            username: None,
            avatar_url: None,
            embeds,
        })?;
        info!(blocks = embeds.len(), %payload, "dry run, not posting");

        Ok(())
    }
}
