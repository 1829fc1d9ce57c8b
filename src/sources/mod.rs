use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod post;
pub mod twitter;

pub use post::{MatchEvent, PostData, PostType, StreamRule};
pub use twitter::{TweetLookup, TwitterClient};

#[derive(Debug, Error)]
pub enum TwitterError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Scheme(#[from] serde_json::Error),
    #[error("bearer token rejected")]
    Unauthorized,
    #[error("ratelimited for {} seconds", .timeout.as_secs())]
    RateLimited { timeout: Duration },
    #[error("API returned error {status}: {detail}")]
    Server { status: u16, detail: String },
    #[error("rule change rejected: {0}")]
    RuleConflict(String),
    #[error("invalid rule: {0}")]
    InvalidRule(String),
    #[error("stream disconnected: {0}")]
    Disconnected(String),
}

impl TwitterError {
    /// Errors that can't be fixed by reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::InvalidRule(_))
    }
}

/// Everything the bridge needs from the Twitter API.
#[async_trait]
pub trait TwitterApi: Send + Sync {
    /// `GET /2/tweets/:id` with author and media expansions.
    async fn lookup_tweet(&self, id: &str) -> Result<TweetLookup, TwitterError>;

    async fn active_rules(&self) -> Result<Vec<StreamRule>, TwitterError>;

    async fn add_rule(&self, value: &str) -> Result<(), TwitterError>;

    async fn delete_rules(&self, ids: &[String]) -> Result<(), TwitterError>;

    async fn open_stream(&self) -> Result<Box<dyn MatchStream>, TwitterError>;
}

/// An open filtered stream connection. Dropping it closes the connection.
#[async_trait]
pub trait MatchStream: Send {
    /// Waits for the next matching tweet. Any failure is reported as
    /// [`TwitterError::Disconnected`].
    async fn next_match(&mut self) -> Result<MatchEvent, TwitterError>;
}
