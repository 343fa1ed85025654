//! Actor runtime
//!
//! Every actor owns a bounded mailbox and one run loop (a spawned task) that
//! is the only mutator of its state. Bus deliveries are enqueued into the
//! mailbox by a `MailboxSubscriber`, never executed on the publisher's stack.
//! The loop uses `tokio::select!` over:
//!   - the stop signal (checked first)
//!   - the mailbox (bus envelopes and direct typed messages)
//!   - an optional periodic tick

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::lifecycle::ActorState;
use crate::bus::{Envelope, MessageBus, Outbound, Payload, Subscriber, SubscriptionId};
use crate::error::{ActorError, FleetError, Result};

/// Mailbox item: a bus envelope or a direct typed message
#[derive(Debug)]
pub enum Mail<M> {
    Envelope(Envelope),
    Direct(M),
}

/// Bus subscriber that enqueues into an actor mailbox.
///
/// A full mailbox applies backpressure for up to `backpressure`, then the
/// delivery fails with `MailboxFull`.
pub struct MailboxSubscriber<M> {
    name: String,
    tx: mpsc::Sender<Mail<M>>,
    backpressure: Duration,
}

impl<M> MailboxSubscriber<M> {
    pub fn new(name: &str, tx: mpsc::Sender<Mail<M>>, backpressure: Duration) -> Self {
        Self {
            name: name.to_string(),
            tx,
            backpressure,
        }
    }
}

#[async_trait]
impl<M: Send + 'static> Subscriber for MailboxSubscriber<M> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        match self.tx.try_send(Mail::Envelope(envelope.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => {
                Err(FleetError::from(ActorError::MailboxClosed(self.name.clone())))
            }
            Err(TrySendError::Full(mail)) => {
                debug!(actor = %self.name, topic = %envelope.topic, "mailbox full, waiting");
                self.tx
                    .send_timeout(mail, self.backpressure)
                    .await
                    .map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => {
                            FleetError::from(ActorError::MailboxFull(self.name.clone()))
                        }
                        SendTimeoutError::Closed(_) => {
                            FleetError::from(ActorError::MailboxClosed(self.name.clone()))
                        }
                    })
            }
        }
    }
}

/// Clonable address of a running actor
pub struct ActorRef<M> {
    id: Arc<str>,
    tx: mpsc::Sender<Mail<M>>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue a direct message, waiting for mailbox space
    pub async fn tell(&self, msg: M) -> std::result::Result<(), ActorError> {
        self.tx
            .send(Mail::Direct(msg))
            .await
            .map_err(|_| ActorError::MailboxClosed(self.id.to_string()))
    }

    /// Enqueue a direct message without waiting
    pub fn try_tell(&self, msg: M) -> std::result::Result<(), ActorError> {
        self.tx.try_send(Mail::Direct(msg)).map_err(|e| match e {
            TrySendError::Full(_) => ActorError::MailboxFull(self.id.to_string()),
            TrySendError::Closed(_) => ActorError::MailboxClosed(self.id.to_string()),
        })
    }

    /// Request/reply: build a message around a reply channel and await the answer
    pub async fn ask<R, F>(&self, make: F, timeout: Duration) -> std::result::Result<R, ActorError>
    where
        R: Send,
        F: FnOnce(oneshot::Sender<R>) -> M + Send,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tell(make(reply_tx)).await?;
            reply_rx
                .await
                .map_err(|_| ActorError::ReplyDropped(self.id.to_string()))
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ActorError::AskTimeout {
                actor: self.id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// What a handler can reach while reacting
pub struct ActorContext<M> {
    id: String,
    bus: Arc<MessageBus>,
    myself: ActorRef<M>,
    stop: Arc<watch::Sender<bool>>,
}

impl<M: Send + 'static> ActorContext<M> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Address of this actor, for spawned work that reports back
    pub fn myself(&self) -> ActorRef<M> {
        self.myself.clone()
    }

    /// Publish with this actor's id as sender
    pub async fn publish(&self, topic: &str, payload: Payload) -> Result<usize> {
        self.bus.publish(topic, payload, &self.id).await
    }

    /// Publish effects in order; failures are logged and do not stop the rest
    pub async fn publish_all(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            if let Err(e) = self.publish(&out.topic, out.payload).await {
                warn!(actor = %self.id, topic = %out.topic, error = %e, "publish failed");
            }
        }
    }

    /// Ask the run loop to stop after the current reaction
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Behaviour shared by the bus-facing components
#[async_trait]
pub trait Actor: Send + 'static {
    /// Direct message type accepted besides bus envelopes
    type Msg: Send + 'static;

    fn id(&self) -> &str;

    /// Topic patterns subscribed on start and removed on stop
    fn subscriptions(&self) -> Vec<String> {
        Vec::new()
    }

    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    async fn on_start(&mut self, _ctx: &ActorContext<Self::Msg>) -> Result<()> {
        Ok(())
    }

    async fn on_envelope(
        &mut self,
        envelope: Envelope,
        ctx: &ActorContext<Self::Msg>,
    ) -> Result<()>;

    async fn on_message(&mut self, _msg: Self::Msg, _ctx: &ActorContext<Self::Msg>) -> Result<()> {
        Ok(())
    }

    async fn on_tick(&mut self, _ctx: &ActorContext<Self::Msg>) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ActorContext<Self::Msg>) {}
}

/// Owner of an actor's lifecycle
pub struct ActorHandle<A: Actor> {
    id: String,
    bus: Arc<MessageBus>,
    tx: mpsc::Sender<Mail<A::Msg>>,
    pending: Option<(A, mpsc::Receiver<Mail<A::Msg>>)>,
    state: Arc<watch::Sender<ActorState>>,
    stop: Arc<watch::Sender<bool>>,
    join: Option<JoinHandle<()>>,
}

impl<A: Actor> ActorHandle<A> {
    pub fn new(actor: A, bus: Arc<MessageBus>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (state, _) = watch::channel(ActorState::Created);
        let (stop, _) = watch::channel(false);
        Self {
            id: actor.id().to_string(),
            bus,
            tx,
            pending: Some((actor, rx)),
            state: Arc::new(state),
            stop: Arc::new(stop),
            join: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ActorState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ActorState> {
        self.state.subscribe()
    }

    pub fn actor_ref(&self) -> ActorRef<A::Msg> {
        ActorRef {
            id: Arc::from(self.id.as_str()),
            tx: self.tx.clone(),
        }
    }

    /// Subscribe the actor's patterns and spawn its run loop
    pub async fn start(&mut self) -> Result<()> {
        match self.state() {
            ActorState::Created => {}
            ActorState::Running => return Err(ActorError::AlreadyRunning(self.id.clone()).into()),
            ActorState::StopRequested | ActorState::Stopped => {
                return Err(ActorError::AlreadyStopped(self.id.clone()).into())
            }
        }
        let Some((actor, rx)) = self.pending.take() else {
            return Err(ActorError::AlreadyRunning(self.id.clone()).into());
        };

        let backpressure = self.bus.handler_timeout() / 2;
        let mut subscriptions = Vec::new();
        for pattern in actor.subscriptions() {
            let subscriber = Arc::new(MailboxSubscriber::new(
                &self.id,
                self.tx.clone(),
                backpressure,
            ));
            match self.bus.subscribe(&pattern, subscriber).await {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        self.bus.unsubscribe(id).await;
                    }
                    self.pending = Some((actor, rx));
                    return Err(e);
                }
            }
        }

        let ctx = ActorContext {
            id: self.id.clone(),
            bus: self.bus.clone(),
            myself: self.actor_ref(),
            stop: self.stop.clone(),
        };
        let stop_rx = self.stop.subscribe();
        self.state.send_replace(ActorState::Running);
        info!(
            actor = %self.id,
            subscriptions = subscriptions.len(),
            "actor started"
        );
        self.join = Some(tokio::spawn(run_loop(
            actor,
            rx,
            ctx,
            stop_rx,
            self.state.clone(),
            subscriptions,
        )));
        Ok(())
    }

    /// Stop the actor and wait for its loop to finish. Idempotent; stopping
    /// before start leaves the actor permanently stopped.
    pub async fn stop(&mut self) {
        if self.state() == ActorState::Created {
            self.pending = None;
            self.stop.send_replace(true);
            self.state.send_replace(ActorState::Stopped);
            info!(actor = %self.id, "actor stopped before start");
            return;
        }

        self.stop.send_replace(true);
        self.state.send_if_modified(|state| {
            if *state == ActorState::Running {
                *state = ActorState::StopRequested;
                true
            } else {
                false
            }
        });

        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(actor = %self.id, error = %e, "actor task ended abnormally");
                self.state.send_replace(ActorState::Stopped);
            }
        }
    }

    /// Resolves once the run loop has fully stopped
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    pub async fn tell(&self, msg: A::Msg) -> Result<()> {
        Ok(self.actor_ref().tell(msg).await?)
    }

    pub async fn ask<R, F>(&self, make: F, timeout: Duration) -> Result<R>
    where
        R: Send,
        F: FnOnce(oneshot::Sender<R>) -> A::Msg + Send,
    {
        Ok(self.actor_ref().ask(make, timeout).await?)
    }
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<Mail<A::Msg>>,
    ctx: ActorContext<A::Msg>,
    mut stop_rx: watch::Receiver<bool>,
    state: Arc<watch::Sender<ActorState>>,
    subscriptions: Vec<SubscriptionId>,
) {
    let id = ctx.id().to_string();
    if let Err(e) = actor.on_start(&ctx).await {
        warn!(actor = %id, error = %e, "on_start failed");
    }

    let period = actor.tick_interval().filter(|period| {
        if period.is_zero() {
            warn!(actor = %id, "zero tick interval, ticks disabled");
        }
        !period.is_zero()
    });
    let mut tick = period.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        // Don't burst-fire missed ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }
        tokio::select! {
            biased;

            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            mail = rx.recv() => match mail {
                Some(Mail::Envelope(envelope)) => {
                    let topic = envelope.topic.clone();
                    if let Err(e) = actor.on_envelope(envelope, &ctx).await {
                        warn!(actor = %id, topic = %topic, error = %e, "envelope handler failed");
                    }
                }
                Some(Mail::Direct(msg)) => {
                    if let Err(e) = actor.on_message(msg, &ctx).await {
                        warn!(actor = %id, error = %e, "message handler failed");
                    }
                }
                None => break,
            },

            _ = next_tick(&mut tick) => {
                if let Err(e) = actor.on_tick(&ctx).await {
                    warn!(actor = %id, error = %e, "tick handler failed");
                }
            }
        }
    }

    state.send_if_modified(|s| {
        if *s == ActorState::Running {
            *s = ActorState::StopRequested;
            true
        } else {
            false
        }
    });
    for sub in subscriptions {
        ctx.bus().unsubscribe(sub).await;
    }
    actor.on_stop(&ctx).await;
    drop(rx);
    state.send_replace(ActorState::Stopped);
    info!(actor = %id, "actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelSubscriber;
    use serde_json::json;

    enum EchoMsg {
        Count(oneshot::Sender<usize>),
        Ticks(oneshot::Sender<usize>),
        Ignore(oneshot::Sender<usize>),
        Fail,
    }

    struct Echo {
        seen: usize,
        ticks: usize,
        period: Duration,
    }

    #[async_trait]
    impl Actor for Echo {
        type Msg = EchoMsg;

        fn id(&self) -> &str {
            "echo"
        }

        fn subscriptions(&self) -> Vec<String> {
            vec!["echo.in".to_string(), "echo.stop".to_string()]
        }

        fn tick_interval(&self) -> Option<Duration> {
            Some(self.period)
        }

        async fn on_envelope(&mut self, envelope: Envelope, ctx: &ActorContext<EchoMsg>) -> Result<()> {
            if envelope.topic.as_str() == "echo.stop" {
                ctx.request_stop();
                return Ok(());
            }
            self.seen += 1;
            ctx.publish("echo.out", envelope.payload).await?;
            Ok(())
        }

        async fn on_message(&mut self, msg: EchoMsg, _ctx: &ActorContext<EchoMsg>) -> Result<()> {
            match msg {
                EchoMsg::Count(reply) => {
                    let _ = reply.send(self.seen);
                }
                EchoMsg::Ticks(reply) => {
                    let _ = reply.send(self.ticks);
                }
                EchoMsg::Ignore(_reply) => {}
                EchoMsg::Fail => return Err(FleetError::Internal("handler error".into())),
            }
            Ok(())
        }

        async fn on_tick(&mut self, _ctx: &ActorContext<EchoMsg>) -> Result<()> {
            self.ticks += 1;
            Ok(())
        }
    }

    fn echo(bus: &Arc<MessageBus>) -> ActorHandle<Echo> {
        ActorHandle::new(
            Echo {
                seen: 0,
                ticks: 0,
                period: Duration::from_millis(100),
            },
            bus.clone(),
            8,
        )
    }

    #[tokio::test]
    async fn test_start_process_and_stop() {
        let bus = Arc::new(MessageBus::default());
        let (sink, mut out) = ChannelSubscriber::new("sink");
        bus.subscribe("echo.out", sink).await.unwrap();

        let mut handle = echo(&bus);
        assert_eq!(handle.state(), ActorState::Created);
        handle.start().await.unwrap();
        assert_eq!(handle.state(), ActorState::Running);
        assert_eq!(bus.subscriber_count().await, 3);

        bus.publish("echo.in", Payload::custom(json!(1)), "test")
            .await
            .unwrap();
        let echoed = out.recv().await.unwrap();
        assert_eq!(echoed.sender_id, "echo");

        let seen = handle
            .ask(EchoMsg::Count, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(seen, 1);

        handle.stop().await;
        assert_eq!(handle.state(), ActorState::Stopped);
        assert_eq!(bus.subscriber_count().await, 1);

        // idempotent stop, no restart
        handle.stop().await;
        assert!(matches!(
            handle.start().await,
            Err(FleetError::Actor(ActorError::AlreadyStopped(_)))
        ));
        assert!(handle.tell(EchoMsg::Fail).await.is_err());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.start().await.unwrap();
        assert!(matches!(
            handle.start().await,
            Err(FleetError::Actor(ActorError::AlreadyRunning(_)))
        ));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.stop().await;
        assert_eq!(handle.state(), ActorState::Stopped);
        assert!(matches!(
            handle.start().await,
            Err(FleetError::Actor(ActorError::AlreadyStopped(_)))
        ));
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_loop_alive() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.start().await.unwrap();
        handle.tell(EchoMsg::Fail).await.unwrap();
        let seen = handle
            .ask(EchoMsg::Count, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(seen, 0);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_ask_reports_dropped_reply() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.start().await.unwrap();
        let result = handle.ask(EchoMsg::Ignore, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(FleetError::Actor(ActorError::ReplyDropped(_)))
        ));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_request_stop_from_handler() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.start().await.unwrap();
        bus.publish("echo.stop", Payload::custom(json!(null)), "test")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .unwrap();
        assert_eq!(bus.subscriber_count().await, 0);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fire_on_interval() {
        let bus = Arc::new(MessageBus::default());
        let mut handle = echo(&bus);
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticks = handle
            .ask(EchoMsg::Ticks, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ticks, 3);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_tick_interval_disables_ticks() {
        let bus = Arc::new(MessageBus::default());
        let actor = Echo {
            seen: 0,
            ticks: 0,
            period: Duration::ZERO,
        };
        let mut handle = ActorHandle::new(actor, bus.clone(), 8);
        handle.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let ticks = handle
            .ask(EchoMsg::Ticks, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ticks, 0);
        assert_eq!(handle.state(), ActorState::Running);
        handle.stop().await;
    }
}
