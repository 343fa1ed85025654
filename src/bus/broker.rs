//! Message Bus - topic based publish/subscribe broker
//!
//! The subscription table is the only state shared between actors. It lives
//! behind a `RwLock` that is held to snapshot or mutate the table and never
//! while a handler runs, so a handler that publishes cannot deadlock the bus.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::message::{Envelope, Payload};
use super::topic::{Topic, TopicPattern};
use crate::config::BusConfig;
use crate::error::{FleetError, ProtocolError, Result};

/// Receives messages whose topic matches a subscription
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Identity used in delivery logs
    fn name(&self) -> &str;

    async fn deliver(&self, envelope: &Envelope) -> Result<()>;
}

/// Handle returned by `subscribe`, ordered by registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    pattern: TopicPattern,
    subscriber: Arc<dyn Subscriber>,
}

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Messages accepted for delivery
    pub published: u64,
    /// Successful handler deliveries
    pub delivered: u64,
    /// Handler errors, panics and timeouts
    pub failed: u64,
    /// Publishes refused at the boundary (bad topic or payload)
    pub rejected: u64,
}

impl fmt::Display for BusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "published={} delivered={} failed={} rejected={}",
            self.published, self.delivered, self.failed, self.rejected
        )
    }
}

/// In-process publish/subscribe broker
pub struct MessageBus {
    config: BusConfig,
    subscriptions: RwLock<BTreeMap<SubscriptionId, Arc<Subscription>>>,
    history: RwLock<HashMap<Topic, VecDeque<Envelope>>>,
    stats: RwLock<BusStats>,
    next_id: AtomicU64,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscriptions: RwLock::new(BTreeMap::new()),
            history: RwLock::new(HashMap::new()),
            stats: RwLock::new(BusStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn handler_timeout(&self) -> Duration {
        self.config.handler_timeout()
    }

    /// Register `subscriber` for every topic matching `pattern`
    pub async fn subscribe(
        &self,
        pattern: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        let pattern = TopicPattern::parse(pattern)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            subscription = %id,
            pattern = %pattern,
            subscriber = subscriber.name(),
            "subscribed"
        );
        self.subscriptions.write().await.insert(
            id,
            Arc::new(Subscription {
                id,
                pattern,
                subscriber,
            }),
        );
        Ok(id)
    }

    /// Remove a subscription. Returns `false` when it was already gone.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().await.remove(&id);
        match removed {
            Some(sub) => {
                debug!(
                    subscription = %id,
                    pattern = %sub.pattern,
                    subscriber = sub.subscriber.name(),
                    "unsubscribed"
                );
                true
            }
            None => false,
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Validate and deliver a payload to every matching subscription.
    ///
    /// Returns the number of successful deliveries. Handler failures are
    /// logged and counted, never returned to the publisher.
    pub async fn publish(&self, topic: &str, payload: Payload, sender_id: &str) -> Result<usize> {
        let topic = match Topic::parse(topic) {
            Ok(topic) => topic,
            Err(e) => return Err(self.reject(topic, sender_id, e).await),
        };
        if let Err(e) = payload.validate_for(&topic) {
            return Err(self.reject(topic.as_str(), sender_id, e).await);
        }
        self.publish_envelope(Envelope::new(topic, payload, sender_id))
            .await
    }

    async fn reject(&self, topic: &str, sender_id: &str, error: ProtocolError) -> FleetError {
        warn!(topic, sender = sender_id, error = %error, "publish rejected");
        self.stats.write().await.rejected += 1;
        FleetError::Protocol(error)
    }

    /// Deliver an already built envelope (payload validation is still applied)
    pub async fn publish_envelope(&self, envelope: Envelope) -> Result<usize> {
        if let Err(e) = envelope.payload.validate_for(&envelope.topic) {
            return Err(self
                .reject(envelope.topic.as_str(), &envelope.sender_id, e)
                .await);
        }

        self.record(&envelope).await;

        // Snapshot matching subscriptions in registration order, then release the lock
        let targets: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.pattern.matches(&envelope.topic))
            .cloned()
            .collect();

        let mut delivered = 0usize;
        let mut failed = 0u64;
        for sub in targets {
            // Skip subscriptions removed while earlier handlers ran
            if !self.subscriptions.read().await.contains_key(&sub.id) {
                continue;
            }
            if self.deliver_one(&sub, &envelope).await {
                delivered += 1;
            } else {
                failed += 1;
            }
        }

        let mut stats = self.stats.write().await;
        stats.published += 1;
        stats.delivered += delivered as u64;
        stats.failed += failed;
        Ok(delivered)
    }

    async fn deliver_one(&self, sub: &Subscription, envelope: &Envelope) -> bool {
        let timeout = self.config.handler_timeout();
        let delivery = AssertUnwindSafe(sub.subscriber.deliver(envelope)).catch_unwind();
        match tokio::time::timeout(timeout, delivery).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                warn!(
                    topic = %envelope.topic,
                    subscriber = sub.subscriber.name(),
                    error = %e,
                    "handler failed"
                );
                false
            }
            Ok(Err(_)) => {
                warn!(
                    topic = %envelope.topic,
                    subscriber = sub.subscriber.name(),
                    "handler panicked"
                );
                false
            }
            Err(_) => {
                warn!(
                    topic = %envelope.topic,
                    subscriber = sub.subscriber.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "handler timed out"
                );
                false
            }
        }
    }

    async fn record(&self, envelope: &Envelope) {
        let limit = self.config.history_limit;
        if limit == 0 {
            return;
        }
        let mut history = self.history.write().await;
        let entries = history.entry(envelope.topic.clone()).or_default();
        entries.push_back(envelope.clone());
        while entries.len() > limit {
            entries.pop_front();
        }
    }

    /// Last `limit` messages published on `topic`, oldest first
    pub async fn history(&self, topic: &str, limit: usize) -> Vec<Envelope> {
        let Ok(topic) = Topic::parse(topic) else {
            return Vec::new();
        };
        let history = self.history.read().await;
        match history.get(&topic) {
            Some(entries) => {
                let skip = entries.len().saturating_sub(limit);
                entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Topics that have carried at least one message, sorted
    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .history
            .read()
            .await
            .keys()
            .map(|t| t.to_string())
            .collect();
        topics.sort();
        topics
    }

    pub async fn stats(&self) -> BusStats {
        self.stats.read().await.clone()
    }

    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        let subscribers = self.subscriber_count().await;
        info!(subscribers, "bus stats: {}", stats);
    }
}

/// Subscriber backed by an async closure
pub struct FnSubscriber<F> {
    name: String,
    f: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(Envelope) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    pub fn new(name: &str, f: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            f,
        })
    }
}

#[async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(Envelope) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        (self.f)(envelope.clone()).await
    }
}

/// Forwards every delivery into an unbounded channel (control surface, tests)
pub struct ChannelSubscriber {
    name: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSubscriber {
    pub fn new(name: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                name: name.to_string(),
                tx,
            }),
            rx,
        )
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        self.tx
            .send(envelope.clone())
            .map_err(|_| FleetError::Internal(format!("{} receiver dropped", self.name)))
    }
}
