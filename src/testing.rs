//! In-memory stand-ins for the Twitter API and the Discord webhook.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    discord::{Delivery, DiscordError, Embed},
    sources::{
        post::MatchedTweet,
        MatchEvent, MatchStream, PostData, PostType, StreamRule, TweetLookup, TwitterApi,
        TwitterError,
    },
};

/// Calls made to the fakes, in order.
pub type Log = Arc<Mutex<Vec<String>>>;

type Script = Vec<Result<MatchEvent, TwitterError>>;

#[derive(Default)]
pub struct FakeApi {
    log: Log,
    rules: Mutex<Vec<StreamRule>>,
    next_rule_id: AtomicU32,
    tweets: Mutex<HashMap<String, serde_json::Value>>,
    streams: Mutex<VecDeque<Script>>,
    active_rules_failures: Mutex<VecDeque<TwitterError>>,
    reject_adds: AtomicBool,
    reject_deletes: AtomicBool,
    /// Calls that never complete.
    hangs: Mutex<Vec<&'static str>>,
    stop: Mutex<Option<Arc<watch::Sender<bool>>>>,
}

pub struct FakeStream {
    items: VecDeque<Result<MatchEvent, TwitterError>>,
    stop: Option<Arc<watch::Sender<bool>>>,
}

pub struct FakeDelivery {
    log: Log,
    failures: Mutex<VecDeque<DiscordError>>,
    sent: Mutex<Vec<Vec<Embed>>>,
}

impl FakeApi {
    pub fn with_rules(rules: Vec<StreamRule>) -> Self {
        let api = Self::default();
        *api.rules.lock().unwrap() = rules;
        api.next_rule_id.store(1000, Ordering::SeqCst);

        api
    }

    pub fn log(&self) -> Log {
        Arc::clone(&self.log)
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.starts_with("add_rule") || c.starts_with("delete_rules"))
            .count()
    }

    pub fn rules(&self) -> Vec<StreamRule> {
        self.rules.lock().unwrap().clone()
    }

    /// Unknown ids look up as deleted tweets.
    pub fn add_tweet(&self, id: &str, body: serde_json::Value) {
        self.tweets.lock().unwrap().insert(id.to_owned(), body);
    }

    /// Each call scripts one connection; they are opened in order.
    pub fn script_stream(&self, items: Script) {
        self.streams.lock().unwrap().push_back(items);
    }

    pub fn fail_active_rules(&self, err: TwitterError) {
        self.active_rules_failures.lock().unwrap().push_back(err);
    }

    pub fn reject_adds(&self) {
        self.reject_adds.store(true, Ordering::SeqCst);
    }

    pub fn reject_deletes(&self) {
        self.reject_deletes.store(true, Ordering::SeqCst);
    }

    /// Makes every later `call` (`"active_rules"`, `"lookup"`, ...) wait forever.
    pub fn hang_on(&self, call: &'static str) {
        self.hangs.lock().unwrap().push(call);
    }

    /// Stop signal that flips once the last scripted stream runs dry.
    pub fn stop_when_drained(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        *self.stop.lock().unwrap() = Some(Arc::new(tx));

        rx
    }

    fn record(&self, call: String) {
        self.log.lock().unwrap().push(call);
    }

    async fn hang_if_asked(&self, call: &str) {
        let hangs = self.hangs.lock().unwrap().iter().any(|h| *h == call);
        if hangs {
            std::future::pending::<()>().await;
        }
    }

    fn request_stop(&self) {
        if let Some(tx) = self.stop.lock().unwrap().as_ref() {
            tx.send_replace(true);
        }
    }
}

#[async_trait]
impl TwitterApi for FakeApi {
    async fn lookup_tweet(&self, id: &str) -> Result<TweetLookup, TwitterError> {
        self.record(format!("lookup {id}"));
        self.hang_if_asked("lookup").await;

        match self.tweets.lock().unwrap().get(id) {
            Some(body) => Ok(serde_json::from_value(body.clone())?),
            None => Ok(TweetLookup::default()),
        }
    }

    async fn active_rules(&self) -> Result<Vec<StreamRule>, TwitterError> {
        self.record("active_rules".to_owned());
        self.hang_if_asked("active_rules").await;

        if let Some(err) = self.active_rules_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.rules())
    }

    async fn add_rule(&self, value: &str) -> Result<(), TwitterError> {
        self.record(format!("add_rule {value}"));

        if self.reject_adds.load(Ordering::SeqCst) {
            return Err(TwitterError::RuleConflict("DuplicateRule".to_owned()));
        }
        let id = self.next_rule_id.fetch_add(1, Ordering::SeqCst);
        self.rules.lock().unwrap().push(rule(&id.to_string(), value));

        Ok(())
    }

    async fn delete_rules(&self, ids: &[String]) -> Result<(), TwitterError> {
        self.record(format!("delete_rules {}", ids.join(",")));

        if self.reject_deletes.load(Ordering::SeqCst) {
            return Err(TwitterError::RuleConflict("RuleNotFound".to_owned()));
        }
        self.rules.lock().unwrap().retain(|r| !ids.contains(&r.id));

        Ok(())
    }

    async fn open_stream(&self) -> Result<Box<dyn MatchStream>, TwitterError> {
        self.record("open_stream".to_owned());
        self.hang_if_asked("open_stream").await;

        let Some(items) = self.streams.lock().unwrap().pop_front() else {
            self.request_stop();
            return Err(TwitterError::Disconnected("nothing scripted".to_owned()));
        };
        let last = self.streams.lock().unwrap().is_empty();

        Ok(Box::new(FakeStream {
            items: items.into(),
            stop: if last {
                self.stop.lock().unwrap().clone()
            } else {
                None
            },
        }))
    }
}

#[async_trait]
impl MatchStream for FakeStream {
    async fn next_match(&mut self) -> Result<MatchEvent, TwitterError> {
        if let Some(item) = self.items.pop_front() {
            return item;
        }

        if let Some(tx) = &self.stop {
            tx.send_replace(true);
            std::future::pending::<()>().await;
        }
        Err(TwitterError::Disconnected("script finished".to_owned()))
    }
}

impl FakeDelivery {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            failures: Mutex::default(),
            sent: Mutex::default(),
        }
    }

    pub fn fail_next(&self, err: DiscordError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn sent(&self) -> Vec<Vec<Embed>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn send(&self, embeds: &[Embed]) -> Result<(), DiscordError> {
        self.log.lock().unwrap().push(format!("send {}", embeds.len()));

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(embeds.to_vec());

        Ok(())
    }
}

pub fn rule(id: &str, value: &str) -> StreamRule {
    StreamRule {
        id: id.to_owned(),
        value: value.to_owned(),
    }
}

pub fn lookup(body: serde_json::Value) -> TweetLookup {
    serde_json::from_value(body).unwrap()
}

pub fn match_event(id: &str, text: &str) -> MatchEvent {
    MatchEvent {
        data: MatchedTweet {
            id: id.to_owned(),
            text: text.to_owned(),
            created_at: None,
        },
        matching_rules: Vec::new(),
    }
}

/// A tweet by `Alice (@alice)` without media or profile image.
pub fn post(id: &str, post_type: PostType) -> PostData {
    PostData {
        id: id.to_owned(),
        text: format!("text {id}"),
        author_username: "alice".to_owned(),
        author_name: "Alice".to_owned(),
        author_image_url: None,
        url: format!("https://twitter.com/alice/status/{id}"),
        created_at: "12:00:00 • 15.06.2023".to_owned(),
        post_type,
        reference_id: (post_type != PostType::Normal).then(|| "ref".to_owned()),
        media_urls: Vec::new(),
    }
}
