use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::{
    sync::watch,
    time::{self, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    discord::{Delivery, DiscordError, Embed},
    embed::{unavailable_notice, MessageBuilder, MessageKind, DEFAULT_MISSING_REFERENCE_TEXT},
    enrich::{Lookup, PostEnricher},
    rules::RuleReconciler,
    sources::{MatchEvent, MatchStream, TwitterApi, TwitterError},
};

/// A connection that stayed up this long counts as healthy and resets the
/// backoff.
const HEALTHY_CONNECTION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    RulesSynced,
    Listening,
    Disconnected,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("could not start the stream: {0}")]
    Startup(#[source] TwitterError),
}

/// Delay before each reconnect attempt.
///
/// The first attempt after a healthy connection is immediate, every further
/// consecutive attempt doubles the delay, starting at `initial_delay` and
/// capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl ReconnectPolicy {
    /// `failures` is the number of reconnects attempted since the last
    /// healthy connection.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let factor = 2u32.saturating_pow(failures - 1);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Keeps the filtered stream alive and forwards every match to Discord.
pub struct StreamSession<A, D> {
    api: A,
    delivery: D,
    rule: String,
    missing_reference_text: String,
    reconnect: ReconnectPolicy,
    state: SessionState,
    failures: u32,
    /// Set once the stream has been opened at least once.
    started: bool,
}

impl<A: TwitterApi, D: Delivery> StreamSession<A, D> {
    pub fn new(api: A, delivery: D, rule: String) -> Self {
        Self {
            api,
            delivery,
            rule,
            missing_reference_text: DEFAULT_MISSING_REFERENCE_TEXT.to_owned(),
            reconnect: ReconnectPolicy::default(),
            state: SessionState::Idle,
            failures: 0,
            started: false,
        }
    }

    pub fn missing_reference_text(mut self, text: String) -> Self {
        self.missing_reference_text = text;

        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;

        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs until `stop` turns `true`.
    ///
    /// Only returns an error for failures before the stream was first opened
    /// that reconnecting can't fix (rejected token, invalid rule).
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> Result<(), SessionError> {
        let mut stream: Option<Box<dyn MatchStream>> = None;
        let mut listening_since = Instant::now();

        while !*stop.borrow() {
            match self.state {
                SessionState::Idle | SessionState::Reconnecting => {
                    let reconciler = RuleReconciler::new(&self.api);
                    let Some(synced) =
                        until_stopped(&mut stop, reconciler.reconcile(&self.rule, true)).await
                    else {
                        continue;
                    };

                    match synced {
                        Ok(changes) => {
                            debug!(
                                deleted = changes.deleted.len(),
                                added = changes.added,
                                "rules synced"
                            );
                            self.transition(SessionState::RulesSynced);
                        }
                        Err(e) if e.is_fatal() && !self.started => {
                            error!(error = %e, "rule sync failed");
                            return Err(SessionError::Startup(e));
                        }
                        Err(TwitterError::RuleConflict(reason)) => {
                            warn!(%reason, "rule change rejected, keeping current rules");
                            self.transition(SessionState::RulesSynced);
                        }
                        Err(e) => {
                            warn!(error = %e, "rule sync failed");
                            self.transition(SessionState::Disconnected);
                        }
                    }
                }
                SessionState::RulesSynced => {
                    match until_stopped(&mut stop, self.api.open_stream()).await {
                        None => {}
                        Some(Ok(s)) => {
                            stream = Some(s);
                            self.started = true;
                            listening_since = Instant::now();
                            info!("filtered stream connected");
                            self.transition(SessionState::Listening);
                        }
                        Some(Err(e)) if e.is_fatal() && !self.started => {
                            error!(error = %e, "could not open filtered stream");
                            return Err(SessionError::Startup(e));
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "could not open filtered stream");
                            self.transition(SessionState::Disconnected);
                        }
                    }
                }
                SessionState::Listening => {
                    let Some(s) = stream.as_mut() else {
                        self.transition(SessionState::Disconnected);
                        continue;
                    };

                    match until_stopped(&mut stop, s.next_match()).await {
                        None => {}
                        Some(Ok(event)) => {
                            self.failures = 0;
                            until_stopped(&mut stop, self.handle_match(event)).await;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "filtered stream lost");
                            if listening_since.elapsed() >= HEALTHY_CONNECTION {
                                self.failures = 0;
                            }
                            self.transition(SessionState::Disconnected);
                        }
                    }
                }
                SessionState::Disconnected => {
                    if stream.take().is_some() {
                        info!("disconnected from filtered stream");
                    }

                    let delay = self.reconnect.delay(self.failures);
                    self.failures = self.failures.saturating_add(1);
                    if !delay.is_zero() {
                        info!(delay_secs = delay.as_secs_f32(), "waiting before reconnect");
                        until_stopped(&mut stop, time::sleep(delay)).await;
                    }

                    self.transition(SessionState::Reconnecting);
                }
                SessionState::Stopped => break,
            }
        }

        drop(stream);
        self.transition(SessionState::Stopped);

        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    async fn handle_match(&self, event: MatchEvent) {
        let id = event.data.id.as_str();
        let rules: Vec<&str> = event.matching_rules.iter().map(|r| r.id.as_str()).collect();
        debug!(id, ?rules, "stream match");
        let enricher = PostEnricher::new(&self.api);

        let post = match enricher.enrich(id).await {
            Ok(Lookup::Found(post)) => post,
            Ok(Lookup::NotFound) => {
                info!(id, "matched tweet no longer available");
                self.deliver(&unavailable_notice(&event.data)).await;
                return;
            }
            Err(e) => {
                error!(id, error = %e, "failed to look up matched tweet");
                return;
            }
        };

        let Ok(kind) = MessageKind::try_from(post.post_type) else {
            warn!(url = %post.url, "unknown tweet type, dropping");
            return;
        };

        let reference = match (kind, post.reference_id.as_deref()) {
            (MessageKind::Normal, _) | (_, None) => None,
            (_, Some(reference_id)) => match enricher.enrich(reference_id).await {
                Ok(Lookup::Found(reference)) => Some(reference),
                Ok(Lookup::NotFound) => {
                    info!(id = reference_id, "referenced tweet was deleted");
                    None
                }
                Err(e) => {
                    warn!(id = reference_id, error = %e, "failed to look up referenced tweet");
                    None
                }
            },
        };

        info!(kind = %post.post_type, url = %post.url, "new tweet");
        let embeds = MessageBuilder::new(kind, &post)
            .reference(reference.as_ref())
            .missing_reference_text(&self.missing_reference_text)
            .build();
        self.deliver(&embeds).await;
    }

    /// Failed sends are dropped. A rate limit is waited out once.
    async fn deliver(&self, embeds: &[Embed]) {
        let res = match self.delivery.send(embeds).await {
            Err(DiscordError::RateLimited { timeout }) => {
                warn!(timeout_secs = timeout.as_secs_f32(), "discord ratelimited, retrying once");
                time::sleep(timeout).await;
                self.delivery.send(embeds).await
            }
            res => res,
        };

        if let Err(e) = res {
            error!(error = %e, "failed to post to discord");
        }
    }
}

/// `None` if a stop was requested before `step` finished.
async fn until_stopped<T>(
    stop: &mut watch::Receiver<bool>,
    step: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        () = stop_requested(stop) => None,
        out = step => Some(out),
    }
}

/// Resolves once a stop was requested. Never resolves if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
