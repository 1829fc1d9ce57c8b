use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, warn};

use super::{MatchEvent, MatchStream, StreamRule, TwitterApi, TwitterError};

const API_BASE: &str = "https://api.twitter.com/2";
/// Used when a 429 comes without `x-rate-limit-reset`.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Total deadline for every request except the stream.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TWEET_FIELDS: &str = "entities,attachments,referenced_tweets,created_at,author_id";
const EXPANSIONS: &str = "attachments.media_keys,author_id";
const MEDIA_FIELDS: &str = "type,url";
const USER_FIELDS: &str = "username,name,profile_image_url";

pub struct TwitterClient {
    token: String,
    http: Client,
    stream_timeout: Duration,
}

/// Body of `GET /2/tweets/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetLookup {
    #[serde(default)]
    pub data: Option<RawTweet>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawTweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedTweet>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct ReferencedTweet {
    pub r#type: String,
    pub id: String,
}
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<RawUser>,
    #[serde(default)]
    pub media: Vec<RawMedia>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}
#[derive(Debug, Clone, Deserialize)]
pub struct RawMedia {
    pub r#type: String,
    /// Only set for photos.
    #[serde(default)]
    pub url: Option<String>,
}
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiProblem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Deserialize)]
struct RulesResponse {
    #[serde(default)]
    data: Vec<StreamRule>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum RulesRequest<'a> {
    Add(Vec<NewRule<'a>>),
    Delete { ids: &'a [String] },
}
#[derive(Serialize)]
struct NewRule<'a> {
    value: &'a str,
}

/// Either a match or an in-band error (e.g. `operational-disconnect`).
#[derive(Deserialize)]
struct StreamLine {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

pub struct TwitterStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl ApiProblem {
    fn is_invalid_rule(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.ends_with("/invalid-rules"))
    }

    fn describe(&self) -> String {
        match (&self.detail, &self.value) {
            (Some(detail), _) => format!("{}: {detail}", self.title),
            (None, Some(value)) => format!("{}: {value}", self.title),
            (None, None) => self.title.clone(),
        }
    }
}

impl TwitterClient {
    pub fn new(token: String, stream_timeout: Duration) -> Result<Self, TwitterError> {
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            token,
            http,
            stream_timeout,
        })
    }

    /// No total timeout here, the stream is long-lived.
    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{API_BASE}{path}"))
            .bearer_auth(&self.token)
    }

    async fn mutate_rules(&self, request: &RulesRequest<'_>) -> Result<(), TwitterError> {
        let res = self
            .http
            .post(format!("{API_BASE}/tweets/search/stream/rules"))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .json(request)
            .send()
            .await?;
        let body = check_status(res).await?.text().await?;
        let res: RulesResponse = serde_json::from_str(&body)?;

        if let Some(problem) = res.errors.iter().find(|p| p.is_invalid_rule()) {
            return Err(TwitterError::InvalidRule(problem.describe()));
        }
        if !res.errors.is_empty() {
            let detail = res
                .errors
                .iter()
                .map(ApiProblem::describe)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TwitterError::RuleConflict(detail));
        }

        Ok(())
    }
}

#[async_trait]
impl TwitterApi for TwitterClient {
    async fn lookup_tweet(&self, id: &str) -> Result<TweetLookup, TwitterError> {
        let res = self
            .get(&format!("/tweets/{id}"))
            .query(&[
                ("tweet.fields", TWEET_FIELDS),
                ("expansions", EXPANSIONS),
                ("media.fields", MEDIA_FIELDS),
                ("user.fields", USER_FIELDS),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if res.status() == StatusCode::NOT_FOUND {
            debug!(id, "tweet lookup returned 404");
            return Ok(TweetLookup::default());
        }

        let body = check_status(res).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn active_rules(&self) -> Result<Vec<StreamRule>, TwitterError> {
        let res = self
            .get("/tweets/search/stream/rules")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let body = check_status(res).await?.text().await?;
        let res: RulesResponse = serde_json::from_str(&body)?;

        Ok(res.data)
    }

    async fn add_rule(&self, value: &str) -> Result<(), TwitterError> {
        self.mutate_rules(&RulesRequest::Add(vec![NewRule { value }]))
            .await
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<(), TwitterError> {
        self.mutate_rules(&RulesRequest::Delete { ids }).await
    }

    async fn open_stream(&self) -> Result<Box<dyn MatchStream>, TwitterError> {
        let request = self
            .get("/tweets/search/stream")
            .query(&[("tweet.fields", "created_at")])
            .send();
        let res = time::timeout(self.stream_timeout, request)
            .await
            .map_err(|_| no_data(self.stream_timeout))??;
        let res = check_status(res).await?;

        Ok(Box::new(TwitterStream {
            body: res.bytes_stream().map(|c| c.map(|b| b.to_vec())).boxed(),
            buffer: Vec::new(),
            timeout: self.stream_timeout,
        }))
    }
}

#[async_trait]
impl MatchStream for TwitterStream {
    async fn next_match(&mut self) -> Result<MatchEvent, TwitterError> {
        loop {
            while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=end).collect();
                if let Some(res) = parse_stream_line(&String::from_utf8_lossy(&line)) {
                    return res;
                }
            }

            match time::timeout(self.timeout, self.body.next()).await {
                Err(_) => return Err(no_data(self.timeout)),
                Ok(None) => {
                    return Err(TwitterError::Disconnected(
                        "stream closed by server".to_owned(),
                    ))
                }
                Ok(Some(Err(e))) => return Err(TwitterError::Disconnected(e.to_string())),
                Ok(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
            }
        }
    }
}

fn no_data(timeout: Duration) -> TwitterError {
    TwitterError::Disconnected(format!("no data for {} seconds", timeout.as_secs_f32()))
}

/// `None` for keep-alives and lines that can't be used.
fn parse_stream_line(line: &str) -> Option<Result<MatchEvent, TwitterError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamLine>(line) {
        Ok(StreamLine { data: Some(_), .. }) => match serde_json::from_str(line) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, "skipping malformed stream line");
                None
            }
        },
        Ok(StreamLine { errors, .. }) if !errors.is_empty() => {
            let reason = errors
                .iter()
                .map(ApiProblem::describe)
                .collect::<Vec<_>>()
                .join("; ");
            Some(Err(TwitterError::Disconnected(reason)))
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "skipping malformed stream line");
            None
        }
    }
}

async fn check_status(res: Response) -> Result<Response, TwitterError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TwitterError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => {
            let timeout = res
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .and_then(|reset| {
                    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
                    Some(Duration::from_secs(reset.saturating_sub(now.as_secs())))
                })
                .unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
            Err(TwitterError::RateLimited { timeout })
        }
        _ => Err(TwitterError::Server {
            status: status.as_u16(),
            detail: res.text().await.unwrap_or_default(),
        }),
    }
}
