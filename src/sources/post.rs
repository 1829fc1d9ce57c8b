use std::fmt::Display;

use serde::Deserialize;

/// Fallback used when the API omits the author expansion.
pub const UNKNOWN_AUTHOR: &str = "unk";

/// Kind of a tweet, derived from the first entry of its reference list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostType {
    Normal,
    Repost,
    Quote,
    Reply,
    /// Reference kind this bridge does not know about.
    Unknown,
}

impl PostType {
    /// Maps the API's `referenced_tweets[].type` string.
    pub fn from_reference_kind(kind: &str) -> Self {
        match kind {
            "retweeted" => Self::Repost,
            "quoted" => Self::Quote,
            "replied_to" => Self::Reply,
            _ => Self::Unknown,
        }
    }
}

impl Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Normal => "tweet",
            Self::Repost => "retweet",
            Self::Quote => "quote tweet",
            Self::Reply => "reply",
            Self::Unknown => "unknown",
        })
    }
}

/// Everything needed to render one tweet. Built fresh on every lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PostData {
    pub id: String,
    /// Raw text as returned by the API (HTML-escaped).
    pub text: String,
    pub author_username: String,
    pub author_name: String,
    pub author_image_url: Option<String>,
    /// Permalink.
    pub url: String,
    /// Already rendered in the bridge's display timezone.
    pub created_at: String,
    pub post_type: PostType,
    /// `None` iff `post_type` is [`PostType::Normal`].
    pub reference_id: Option<String>,
    /// Photo URLs in API order.
    pub media_urls: Vec<String>,
}

impl PostData {
    pub fn has_author(&self) -> bool {
        self.author_username != UNKNOWN_AUTHOR
    }

    /// `name (@username)`
    pub fn author_label(&self) -> String {
        format!("{} (@{})", self.author_name, self.author_username)
    }

    pub fn profile_url(&self) -> Option<String> {
        self.has_author()
            .then(|| profile_url(&self.author_username))
    }
}

pub fn profile_url(username: &str) -> String {
    format!("https://twitter.com/{username}")
}

/// Canonical permalink; `username` falls back to the generic `i` path.
pub fn permalink(username: Option<&str>, id: &str) -> String {
    format!("https://twitter.com/{}/status/{id}", username.unwrap_or("i"))
}

/// One line of the filtered stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MatchEvent {
    pub data: MatchedTweet,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MatchedTweet {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MatchingRule {
    pub id: String,
}

/// Server-side filter rule. `id` is assigned by the server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StreamRule {
    pub id: String,
    pub value: String,
}
