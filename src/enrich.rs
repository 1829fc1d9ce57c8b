use chrono::DateTime;
use chrono_tz::Europe::Zurich;
use tracing::debug;

use crate::sources::{
    post::{permalink, UNKNOWN_AUTHOR},
    twitter::RawUser,
    PostData, PostType, TweetLookup, TwitterApi, TwitterError,
};

/// Stand-in for tweets that come without `created_at`.
const FALLBACK_CREATED_AT: &str = "1337-01-01T13:37:00Z";
const CREATED_AT_FORMAT: &str = "%H:%M:%S • %d.%m.%Y";

/// Outcome of a lookup. A deleted tweet is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(PostData),
    NotFound,
}

/// Fetches a tweet and classifies it.
pub struct PostEnricher<'a, A: ?Sized> {
    api: &'a A,
}

impl<'a, A: TwitterApi + ?Sized> PostEnricher<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self { api }
    }

    /// Does not follow `reference_id`; callers decide whether to look that up.
    pub async fn enrich(&self, id: &str) -> Result<Lookup, TwitterError> {
        let lookup = self.api.lookup_tweet(id).await?;

        Ok(parse_lookup(lookup))
    }
}

pub fn parse_lookup(lookup: TweetLookup) -> Lookup {
    let TweetLookup {
        data,
        includes,
        errors,
    } = lookup;
    let Some(tweet) = data else {
        debug!(errors = ?errors, "lookup returned no tweet");
        return Lookup::NotFound;
    };

    let author: Option<&RawUser> = tweet
        .author_id
        .as_deref()
        .and_then(|author_id| includes.users.iter().find(|u| u.id == author_id))
        .or_else(|| includes.users.first());

    // Only the first reference counts.
    let (post_type, reference_id) = match tweet.referenced_tweets.first() {
        Some(reference) => (
            PostType::from_reference_kind(&reference.r#type),
            Some(reference.id.clone()),
        ),
        None => (PostType::Normal, None),
    };

    let media_urls = includes
        .media
        .into_iter()
        .filter(|m| m.r#type == "photo")
        .filter_map(|m| m.url)
        .collect();

    Lookup::Found(PostData {
        url: permalink(author.map(|a| a.username.as_str()), &tweet.id),
        author_username: author.map_or_else(|| UNKNOWN_AUTHOR.to_owned(), |a| a.username.clone()),
        author_name: author.map_or_else(|| UNKNOWN_AUTHOR.to_owned(), |a| a.name.clone()),
        author_image_url: author.and_then(|a| a.profile_image_url.clone()),
        created_at: format_created_at(tweet.created_at.as_deref()),
        id: tweet.id,
        text: tweet.text,
        post_type,
        reference_id,
        media_urls,
    })
}

/// Renders an RFC 3339 timestamp in Zurich local time.
pub fn format_created_at(raw: Option<&str>) -> String {
    raw.and_then(|r| DateTime::parse_from_rfc3339(r).ok())
        .or_else(|| DateTime::parse_from_rfc3339(FALLBACK_CREATED_AT).ok())
        .map(|at| at.with_timezone(&Zurich).format(CREATED_AT_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{lookup, FakeApi};

    fn found(lookup: Lookup) -> PostData {
        match lookup {
            Lookup::Found(post) => post,
            Lookup::NotFound => panic!("expected a tweet"),
        }
    }

    #[test]
    fn normal_tweet() {
        let post = found(parse_lookup(lookup(json!({
            "data": {
                "id": "100",
                "text": "hello &amp; welcome",
                "author_id": "7",
                "created_at": "2023-06-15T10:00:00.000Z"
            },
            "includes": {
                "users": [{
                    "id": "7",
                    "username": "alice",
                    "name": "Alice",
                    "profile_image_url": "https://pbs.twimg.com/a.jpg"
                }]
            }
        }))));

        assert_eq!(post.post_type, PostType::Normal);
        assert_eq!(post.reference_id, None);
        assert_eq!(post.author_username, "alice");
        assert_eq!(post.author_name, "Alice");
        assert_eq!(post.author_image_url.as_deref(), Some("https://pbs.twimg.com/a.jpg"));
        assert_eq!(post.url, "https://twitter.com/alice/status/100");
        assert_eq!(post.created_at, "12:00:00 • 15.06.2023");
        assert_eq!(post.text, "hello &amp; welcome");
        assert!(post.media_urls.is_empty());
    }

    #[test]
    fn retweet_is_a_repost() {
        let post = found(parse_lookup(lookup(json!({
            "data": {
                "id": "101",
                "text": "RT @bob: hi",
                "referenced_tweets": [{ "type": "retweeted", "id": "55" }]
            }
        }))));

        assert_eq!(post.post_type, PostType::Repost);
        assert_eq!(post.reference_id.as_deref(), Some("55"));
    }

    #[test]
    fn only_first_reference_counts() {
        let post = found(parse_lookup(lookup(json!({
            "data": {
                "id": "102",
                "text": "both",
                "referenced_tweets": [
                    { "type": "quoted", "id": "1" },
                    { "type": "replied_to", "id": "2" }
                ]
            }
        }))));

        assert_eq!(post.post_type, PostType::Quote);
        assert_eq!(post.reference_id.as_deref(), Some("1"));
    }

    #[test]
    fn unrecognized_reference_kind() {
        let post = found(parse_lookup(lookup(json!({
            "data": {
                "id": "103",
                "text": "?",
                "referenced_tweets": [{ "type": "spaced_out", "id": "3" }]
            }
        }))));

        assert_eq!(post.post_type, PostType::Unknown);
        assert_eq!(post.reference_id.as_deref(), Some("3"));
    }

    #[test]
    fn missing_author_expansion() {
        let post = found(parse_lookup(lookup(json!({
            "data": { "id": "104", "text": "anon" }
        }))));

        assert_eq!(post.author_username, UNKNOWN_AUTHOR);
        assert_eq!(post.author_name, UNKNOWN_AUTHOR);
        assert_eq!(post.author_image_url, None);
        assert_eq!(post.url, "https://twitter.com/i/status/104");
        assert!(!post.created_at.is_empty());
    }

    #[test]
    fn author_matched_by_id() {
        let post = found(parse_lookup(lookup(json!({
            "data": { "id": "105", "text": "x", "author_id": "2" },
            "includes": {
                "users": [
                    { "id": "1", "username": "first", "name": "First" },
                    { "id": "2", "username": "second", "name": "Second" }
                ]
            }
        }))));

        assert_eq!(post.author_username, "second");
    }

    #[test]
    fn photos_kept_in_order() {
        let post = found(parse_lookup(lookup(json!({
            "data": { "id": "106", "text": "pics" },
            "includes": {
                "media": [
                    { "media_key": "3_1", "type": "photo", "url": "https://img/1.jpg" },
                    { "media_key": "7_2", "type": "video", "preview_image_url": "https://img/v.jpg" },
                    { "media_key": "3_3", "type": "photo", "url": "https://img/3.jpg" }
                ]
            }
        }))));

        assert_eq!(post.media_urls, vec!["https://img/1.jpg", "https://img/3.jpg"]);
    }

    #[test]
    fn deleted_tweet_is_not_found() {
        let res = parse_lookup(lookup(json!({
            "errors": [{
                "value": "404",
                "detail": "Could not find tweet with id: [404].",
                "title": "Not Found Error",
                "type": "https://api.twitter.com/2/problems/resource-not-found"
            }]
        })));

        assert_eq!(res, Lookup::NotFound);
    }

    #[test]
    fn timestamps_in_zurich_time() {
        assert_eq!(
            format_created_at(Some("2023-01-15T10:00:00Z")),
            "11:00:00 • 15.01.2023"
        );
        assert_eq!(format_created_at(Some("garbage")), format_created_at(None));
    }

    #[tokio::test]
    async fn enrich_goes_through_the_api() {
        let api = FakeApi::default();
        api.add_tweet(
            "9",
            json!({ "data": { "id": "9", "text": "hey" } }),
        );
        let enricher = PostEnricher::new(&api);

        assert!(matches!(enricher.enrich("9").await.unwrap(), Lookup::Found(p) if p.id == "9"));
        assert_eq!(enricher.enrich("10").await.unwrap(), Lookup::NotFound);
    }
}
