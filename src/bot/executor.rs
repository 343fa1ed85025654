//! Task execution
//!
//! A task is planned into steps from its payload and the world snapshot, then
//! each step runs against the game client. Steps flagged `bank` run inside a
//! bank lease; retriable API errors are retried in place with a backoff.
//! Cancellation is checked between actions and during waits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::game::{Action, ActionOutcome, GameClient};
use crate::actor::CancelToken;
use crate::bank::{Asset, BankRequest, BankResponse, Reservation};
use crate::bus::topic::BANK_REQUEST;
use crate::bus::{MessageBus, Payload};
use crate::config::BotConfig;
use crate::error::{BankViolation, CollaboratorError, ProtocolError, Result};
use crate::orchestrator::TaskAssignment;
use crate::world::WorldData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: Asset,
    pub quantity: u64,
}

/// One planned action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Run inside a bank lease
    #[serde(default)]
    pub bank: bool,
    /// Reserve this amount before the action and settle it after
    #[serde(default)]
    pub withdraw: Option<AssetAmount>,
    /// Record this amount in the ledger after the action
    #[serde(default)]
    pub deposit: Option<AssetAmount>,
}

impl Step {
    fn needs_bank(&self) -> bool {
        self.bank || self.withdraw.is_some() || self.deposit.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    steps: Option<Vec<Step>>,
}

/// Turn an assignment into actions.
///
/// `payload.steps` is used when present, otherwise one action named after the
/// task kind. `payload.target` must exist in the world snapshot.
pub fn plan(assignment: &TaskAssignment, world: &WorldData) -> Result<Vec<(Step, Action)>> {
    let parsed: PlanPayload = match &assignment.payload {
        serde_json::Value::Object(_) => serde_json::from_value(assignment.payload.clone())
            .map_err(|e| ProtocolError::Malformed(format!("task payload: {e}")))?,
        _ => PlanPayload {
            target: None,
            steps: None,
        },
    };

    let target = match &parsed.target {
        Some(id) => Some(world.get(id)?.clone()),
        None => None,
    };

    let steps = parsed.steps.unwrap_or_else(|| {
        vec![Step {
            action: assignment.kind.clone(),
            params: assignment.payload.clone(),
            bank: false,
            withdraw: None,
            deposit: None,
        }]
    });
    if steps.is_empty() {
        return Err(ProtocolError::Malformed("task payload has no steps".to_string()).into());
    }

    Ok(steps
        .into_iter()
        .map(|step| {
            let action = Action {
                name: step.action.clone(),
                params: step.params.clone(),
                target: target.clone(),
            };
            (step, action)
        })
        .collect())
}

/// Why a bank exchange did not succeed
#[derive(Debug, Clone, PartialEq)]
pub enum BankError {
    Cancelled,
    Denied(BankViolation),
    /// The bank dropped this bot's lease or queue slot
    Evicted,
    Unavailable(String),
}

impl From<BankError> for CollaboratorError {
    fn from(error: BankError) -> Self {
        match error {
            BankError::Cancelled => CollaboratorError::local("bank wait cancelled"),
            BankError::Denied(reason) => CollaboratorError::local(format!("bank denied: {reason}")),
            BankError::Evicted => CollaboratorError::local("bank access revoked"),
            BankError::Unavailable(reason) => CollaboratorError::local(format!("bank unavailable: {reason}")),
        }
    }
}

/// Bank operations a running task needs
#[async_trait]
pub trait BankAccess: Send {
    /// Wait for the lease; leaves the queue when cancelled
    async fn acquire(&mut self, cancel: &CancelToken) -> std::result::Result<(), BankError>;
    async fn release(&mut self);
    async fn reserve(&mut self, amount: &AssetAmount) -> std::result::Result<Reservation, BankError>;
    async fn commit_withdraw(
        &mut self,
        reservation_id: &str,
        actual_quantity: u64,
    ) -> std::result::Result<(), BankError>;
    async fn cancel_reservation(&mut self, reservation_id: &str);
    async fn deposit(&mut self, amount: &AssetAmount) -> std::result::Result<(), BankError>;
}

/// Bank access over the bus. The bot actor forwards `bank.response`
/// messages addressed to it into `responses`.
///
/// Responses carry no request id, so every acquire starts with a `Sync`
/// round trip: anything read before the matching `Synced` answers an
/// earlier request (a grant that raced an abandon, a late denial) and is
/// dropped.
pub struct BusBankAccess {
    bot_id: String,
    bus: Arc<MessageBus>,
    responses: mpsc::UnboundedReceiver<BankResponse>,
    reply_timeout: Duration,
    wait_timeout: Duration,
    held: bool,
    next_token: u64,
}

impl BusBankAccess {
    pub fn new(
        bot_id: &str,
        bus: Arc<MessageBus>,
        responses: mpsc::UnboundedReceiver<BankResponse>,
        reply_timeout: Duration,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            bus,
            responses,
            reply_timeout,
            wait_timeout,
            held: false,
            next_token: 0,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    async fn send(&self, request: BankRequest) -> std::result::Result<(), BankError> {
        self.bus
            .publish(BANK_REQUEST, Payload::BankRequest(request), &self.bot_id)
            .await
            .map(|_| ())
            .map_err(|e| BankError::Unavailable(e.to_string()))
    }

    /// Next response addressed to this bot, bounded by the reply timeout
    async fn next_response(&mut self) -> std::result::Result<BankResponse, BankError> {
        match tokio::time::timeout(self.reply_timeout, self.responses.recv()).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(BankError::Unavailable("response channel closed".to_string())),
            Err(_) => Err(BankError::Unavailable(format!(
                "no reply within {}ms",
                self.reply_timeout.as_millis()
            ))),
        }
    }

    /// Drain responses to requests sent before this call
    async fn sync(&mut self) -> std::result::Result<(), BankError> {
        self.next_token += 1;
        let token = self.next_token;
        self.send(BankRequest::Sync {
            bot_id: self.bot_id.clone(),
            token,
        })
        .await?;
        loop {
            match self.next_response().await? {
                BankResponse::Synced { token: echoed, .. } if echoed == token => return Ok(()),
                stale => debug!(bot_id = %self.bot_id, ?stale, "stale bank response dropped"),
            }
        }
    }

    async fn abandon(&mut self) {
        let request = BankRequest::Abandon {
            bot_id: self.bot_id.clone(),
        };
        if let Err(e) = self.send(request).await {
            warn!(bot_id = %self.bot_id, error = ?e, "bank abandon not sent");
        }
    }

    /// Response to a request made while holding the lease
    async fn held_response(&mut self) -> std::result::Result<BankResponse, BankError> {
        match self.next_response().await? {
            BankResponse::Released { .. } | BankResponse::Dequeued { .. } => {
                warn!(bot_id = %self.bot_id, "bank lease lost");
                self.held = false;
                Err(BankError::Evicted)
            }
            response => Ok(response),
        }
    }
}

#[async_trait]
impl BankAccess for BusBankAccess {
    async fn acquire(&mut self, cancel: &CancelToken) -> std::result::Result<(), BankError> {
        self.sync().await?;
        self.send(BankRequest::Acquire {
            bot_id: self.bot_id.clone(),
        })
        .await?;
        let deadline = tokio::time::sleep(self.wait_timeout);
        tokio::pin!(deadline);
        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abandon().await;
                    return Err(BankError::Cancelled);
                }
                _ = &mut deadline => {
                    warn!(bot_id = %self.bot_id, "gave up waiting for the bank");
                    self.abandon().await;
                    return Err(BankError::Unavailable(format!(
                        "no grant within {}ms",
                        self.wait_timeout.as_millis()
                    )));
                }
                response = self.responses.recv() => response,
            };
            match response {
                Some(BankResponse::Granted { lease_id, .. }) => {
                    debug!(bot_id = %self.bot_id, lease_id, "bank granted");
                    self.held = true;
                    return Ok(());
                }
                Some(BankResponse::Queued { position, .. }) => {
                    debug!(bot_id = %self.bot_id, position, "waiting for bank");
                }
                Some(BankResponse::Denied { reason, .. }) => return Err(BankError::Denied(reason)),
                Some(BankResponse::Dequeued { .. }) | Some(BankResponse::Released { .. }) => {
                    warn!(bot_id = %self.bot_id, "removed from the bank queue");
                    return Err(BankError::Evicted);
                }
                Some(_) => {}
                None => return Err(BankError::Unavailable("response channel closed".to_string())),
            }
        }
    }

    async fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Err(e) = self
            .send(BankRequest::Release {
                bot_id: self.bot_id.clone(),
            })
            .await
        {
            warn!(bot_id = %self.bot_id, error = ?e, "bank release not sent");
        }
    }

    async fn reserve(&mut self, amount: &AssetAmount) -> std::result::Result<Reservation, BankError> {
        self.send(BankRequest::Reserve {
            bot_id: self.bot_id.clone(),
            asset: amount.asset.clone(),
            quantity: amount.quantity,
        })
        .await?;
        loop {
            match self.held_response().await? {
                BankResponse::Reserved { reservation, .. } => return Ok(reservation),
                BankResponse::Denied { reason, .. } => return Err(BankError::Denied(reason)),
                _ => {}
            }
        }
    }

    async fn commit_withdraw(
        &mut self,
        reservation_id: &str,
        actual_quantity: u64,
    ) -> std::result::Result<(), BankError> {
        self.send(BankRequest::CommitWithdraw {
            bot_id: self.bot_id.clone(),
            reservation_id: reservation_id.to_string(),
            actual_quantity,
        })
        .await?;
        loop {
            match self.held_response().await? {
                BankResponse::Withdrawn { .. } => return Ok(()),
                BankResponse::Denied { reason, .. } => return Err(BankError::Denied(reason)),
                _ => {}
            }
        }
    }

    async fn cancel_reservation(&mut self, reservation_id: &str) {
        let request = BankRequest::CancelReservation {
            bot_id: self.bot_id.clone(),
            reservation_id: reservation_id.to_string(),
        };
        if let Err(e) = self.send(request).await {
            warn!(bot_id = %self.bot_id, reservation_id, error = ?e, "reservation cancel not sent");
        }
    }

    async fn deposit(&mut self, amount: &AssetAmount) -> std::result::Result<(), BankError> {
        self.send(BankRequest::Deposit {
            bot_id: self.bot_id.clone(),
            asset: amount.asset.clone(),
            quantity: amount.quantity,
        })
        .await?;
        loop {
            match self.held_response().await? {
                BankResponse::Deposited { .. } => return Ok(()),
                BankResponse::Denied { reason, .. } => return Err(BankError::Denied(reason)),
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(serde_json::Value),
    Failed(CollaboratorError),
    Aborted,
}

enum StepError {
    Aborted,
    Failed(CollaboratorError),
}

impl From<CollaboratorError> for StepError {
    fn from(error: CollaboratorError) -> Self {
        StepError::Failed(error)
    }
}

pub struct Executor {
    bot_id: String,
    client: Arc<dyn GameClient>,
    world: Arc<WorldData>,
    config: BotConfig,
}

impl Executor {
    pub fn new(bot_id: &str, client: Arc<dyn GameClient>, world: Arc<WorldData>, config: BotConfig) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            client,
            world,
            config,
        }
    }

    pub async fn run(
        &self,
        assignment: &TaskAssignment,
        bank: &mut dyn BankAccess,
        cancel: &CancelToken,
    ) -> ExecutionOutcome {
        let steps = match plan(assignment, &self.world) {
            Ok(steps) => steps,
            Err(e) => {
                warn!(bot_id = %self.bot_id, task_id = %assignment.task_id, error = %e, "planning failed");
                return ExecutionOutcome::Failed(CollaboratorError::local(e.to_string()));
            }
        };
        info!(
            bot_id = %self.bot_id,
            task_id = %assignment.task_id,
            attempt = assignment.attempt,
            steps = steps.len(),
            "executing task"
        );

        let mut results = Vec::with_capacity(steps.len());
        for (step, action) in &steps {
            if cancel.is_cancelled() {
                return ExecutionOutcome::Aborted;
            }
            let result = if step.needs_bank() {
                self.run_banked(step, action, bank, cancel).await
            } else {
                self.execute(action, cancel).await
            };
            match result {
                Ok(outcome) => results.push(outcome.data),
                Err(StepError::Aborted) => return ExecutionOutcome::Aborted,
                Err(StepError::Failed(error)) => return ExecutionOutcome::Failed(error),
            }
        }

        ExecutionOutcome::Completed(serde_json::json!({
            "task_id": assignment.task_id,
            "steps": results,
        }))
    }

    async fn run_banked(
        &self,
        step: &Step,
        action: &Action,
        bank: &mut dyn BankAccess,
        cancel: &CancelToken,
    ) -> std::result::Result<ActionOutcome, StepError> {
        match bank.acquire(cancel).await {
            Ok(()) => {}
            Err(BankError::Cancelled) => return Err(StepError::Aborted),
            Err(e) => return Err(StepError::Failed(e.into())),
        }
        let result = self.banked_action(step, action, bank, cancel).await;
        bank.release().await;
        result
    }

    async fn banked_action(
        &self,
        step: &Step,
        action: &Action,
        bank: &mut dyn BankAccess,
        cancel: &CancelToken,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let reservation = match &step.withdraw {
            Some(amount) => Some(bank.reserve(amount).await.map_err(CollaboratorError::from)?),
            None => None,
        };

        let outcome = match self.execute(action, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(reservation) = &reservation {
                    bank.cancel_reservation(&reservation.id).await;
                }
                return Err(e);
            }
        };

        if let Some(reservation) = &reservation {
            bank.commit_withdraw(&reservation.id, reservation.quantity)
                .await
                .map_err(CollaboratorError::from)?;
        }
        if let Some(amount) = &step.deposit {
            bank.deposit(amount).await.map_err(CollaboratorError::from)?;
        }
        Ok(outcome)
    }

    /// One action with timeout and in-place retries for retriable errors
    async fn execute(
        &self,
        action: &Action,
        cancel: &CancelToken,
    ) -> std::result::Result<ActionOutcome, StepError> {
        let attempts = self.config.retriable_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let call = self.client.execute(action, cancel);
            let result = match tokio::time::timeout(self.config.action_timeout(), call).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::local(format!(
                    "{} timed out after {}ms",
                    action.name, self.config.action_timeout_ms
                ))),
            };

            match result {
                Ok(outcome) => {
                    if outcome.cooldown_ms > 0 {
                        self.wait(Duration::from_millis(outcome.cooldown_ms), cancel)
                            .await?;
                    }
                    return Ok(outcome);
                }
                Err(_) if cancel.is_cancelled() => return Err(StepError::Aborted),
                Err(error) if error.is_retriable() && attempt < attempts => {
                    warn!(
                        bot_id = %self.bot_id,
                        action = %action.name,
                        attempt,
                        error = %error,
                        "retriable error, retrying"
                    );
                    self.wait(self.config.retry_backoff(), cancel).await?;
                }
                Err(error) => return Err(StepError::Failed(error)),
            }
        }
    }

    async fn wait(&self, duration: Duration, cancel: &CancelToken) -> std::result::Result<(), StepError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.cancelled() => Err(StepError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::game::MockGameClient;
    use crate::bus::ChannelSubscriber;
    use crate::error::{ErrorBehavior, FleetError};
    use crate::world::Entity;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assignment(kind: &str, payload: serde_json::Value) -> TaskAssignment {
        TaskAssignment {
            task_id: "task-1".into(),
            kind: kind.into(),
            priority: 0,
            payload,
            attempt: 1,
        }
    }

    fn ok_outcome(name: &str) -> ActionOutcome {
        ActionOutcome {
            action: name.into(),
            data: json!(name),
            cooldown_ms: 0,
        }
    }

    fn config() -> BotConfig {
        BotConfig {
            retriable_attempts: 3,
            retry_backoff_ms: 10,
            action_timeout_ms: 1_000,
            ..BotConfig::default()
        }
    }

    fn world() -> Arc<WorldData> {
        Arc::new(WorldData::from_entities([Entity {
            id: "copper_rocks".into(),
            kind: "resource".into(),
            name: None,
            data: json!({"x": 2, "y": 0}),
        }]))
    }

    /// Bank stand-in that grants immediately and records calls
    #[derive(Default)]
    struct FakeBank {
        log: Vec<String>,
        deny_reserve: bool,
    }

    #[async_trait]
    impl BankAccess for FakeBank {
        async fn acquire(&mut self, _cancel: &CancelToken) -> std::result::Result<(), BankError> {
            self.log.push("acquire".into());
            Ok(())
        }
        async fn release(&mut self) {
            self.log.push("release".into());
        }
        async fn reserve(&mut self, amount: &AssetAmount) -> std::result::Result<Reservation, BankError> {
            self.log.push("reserve".into());
            if self.deny_reserve {
                return Err(BankError::Denied(BankViolation::Insufficient {
                    asset: amount.asset.to_string(),
                    requested: amount.quantity,
                    available: 0,
                }));
            }
            Ok(Reservation {
                id: "rsv-1".into(),
                bot_id: "b1".into(),
                asset: amount.asset.clone(),
                quantity: amount.quantity,
            })
        }
        async fn commit_withdraw(&mut self, _id: &str, _actual: u64) -> std::result::Result<(), BankError> {
            self.log.push("commit".into());
            Ok(())
        }
        async fn cancel_reservation(&mut self, _id: &str) {
            self.log.push("cancel_reservation".into());
        }
        async fn deposit(&mut self, _amount: &AssetAmount) -> std::result::Result<(), BankError> {
            self.log.push("deposit".into());
            Ok(())
        }
    }

    #[test]
    fn test_plan_defaults_to_kind() {
        let steps = plan(&assignment("gather", json!(null)), &world()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].1.name, "gather");
        assert!(steps[0].1.target.is_none());
    }

    #[test]
    fn test_plan_resolves_target_and_steps() {
        let payload = json!({
            "target": "copper_rocks",
            "steps": [{"action": "move"}, {"action": "gather", "params": {"count": 3}}],
        });
        let steps = plan(&assignment("gather", payload), &world()).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].1.params["count"], 3);
        assert_eq!(steps[0].1.target.as_ref().unwrap().id, "copper_rocks");
    }

    #[test]
    fn test_plan_unknown_target() {
        let result = plan(&assignment("fight", json!({"target": "dragon"})), &world());
        assert!(matches!(result, Err(FleetError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retriable_errors_retried_in_place() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockGameClient::new();
        client.expect_execute().returning(move |action, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CollaboratorError::from_code(499, "cooldown"))
            } else {
                Ok(ok_outcome(&action.name))
            }
        });

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let outcome = executor
            .run(&assignment("gather", json!(null)), &mut FakeBank::default(), &CancelToken::new())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retriable_attempts_exhausted() {
        let mut client = MockGameClient::new();
        client
            .expect_execute()
            .times(3)
            .returning(|_, _| Err(CollaboratorError::from_code(499, "cooldown")));

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let outcome = executor
            .run(&assignment("gather", json!(null)), &mut FakeBank::default(), &CancelToken::new())
            .await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Failed(CollaboratorError { code: 499, .. })
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let mut client = MockGameClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_, _| Err(CollaboratorError::from_code(452, "token invalid")));

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let outcome = executor
            .run(&assignment("gather", json!(null)), &mut FakeBank::default(), &CancelToken::new())
            .await;
        match outcome {
            ExecutionOutcome::Failed(error) => assert_eq!(error.behavior, ErrorBehavior::Fatal),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start_aborts() {
        let mut client = MockGameClient::new();
        client.expect_execute().never();
        let cancel = CancelToken::new();
        cancel.cancel();

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let outcome = executor
            .run(&assignment("gather", json!(null)), &mut FakeBank::default(), &cancel)
            .await;
        assert_eq!(outcome, ExecutionOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_banked_withdraw_step() {
        let mut client = MockGameClient::new();
        client
            .expect_execute()
            .returning(|action, _| Ok(ok_outcome(&action.name)));
        let payload = json!({
            "steps": [{"action": "withdraw", "withdraw": {"asset": "gold", "quantity": 10}}],
        });

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let mut bank = FakeBank::default();
        let outcome = executor
            .run(&assignment("withdraw", payload), &mut bank, &CancelToken::new())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
        assert_eq!(bank.log, vec!["acquire", "reserve", "commit", "release"]);
    }

    #[tokio::test]
    async fn test_denied_reservation_releases_lease() {
        let mut client = MockGameClient::new();
        client.expect_execute().never();
        let payload = json!({
            "steps": [{"action": "withdraw", "withdraw": {"asset": "gold", "quantity": 10}}],
        });

        let executor = Executor::new("b1", Arc::new(client), world(), config());
        let mut bank = FakeBank {
            deny_reserve: true,
            ..FakeBank::default()
        };
        let outcome = executor
            .run(&assignment("withdraw", payload), &mut bank, &CancelToken::new())
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Failed(_)));
        assert_eq!(bank.log, vec!["acquire", "reserve", "release"]);
    }

    struct BankHarness {
        access: BusBankAccess,
        responses: mpsc::UnboundedSender<BankResponse>,
        requests: mpsc::UnboundedReceiver<crate::bus::Envelope>,
    }

    async fn bank_harness(wait_timeout: Duration) -> BankHarness {
        let bus = Arc::new(MessageBus::default());
        let (subscriber, requests) = ChannelSubscriber::new("bank");
        bus.subscribe(BANK_REQUEST, subscriber).await.unwrap();
        let (responses, rx) = mpsc::unbounded_channel();
        BankHarness {
            access: BusBankAccess::new("b1", bus, rx, Duration::from_secs(1), wait_timeout),
            responses,
            requests,
        }
    }

    async fn next_request(requests: &mut mpsc::UnboundedReceiver<crate::bus::Envelope>) -> BankRequest {
        match requests.recv().await.unwrap().payload {
            Payload::BankRequest(request) => request,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_acquire_drops_responses_from_before_sync() {
        let BankHarness {
            mut access,
            responses,
            mut requests,
        } = bank_harness(Duration::from_secs(5)).await;
        // Grant left over from an earlier task that abandoned its request
        responses
            .send(BankResponse::Granted {
                bot_id: "b1".into(),
                lease_id: 1,
            })
            .unwrap();

        let bank = async {
            let token = match next_request(&mut requests).await {
                BankRequest::Sync { token, .. } => token,
                other => panic!("expected sync, got {other:?}"),
            };
            responses
                .send(BankResponse::Synced {
                    bot_id: "b1".into(),
                    token,
                })
                .unwrap();
            assert!(matches!(next_request(&mut requests).await, BankRequest::Acquire { .. }));
            responses
                .send(BankResponse::Queued {
                    bot_id: "b1".into(),
                    position: 1,
                })
                .unwrap();
            responses
                .send(BankResponse::Granted {
                    bot_id: "b1".into(),
                    lease_id: 2,
                })
                .unwrap();
        };
        let cancel = CancelToken::new();
        let (result, ()) = tokio::join!(access.acquire(&cancel), bank);
        assert_eq!(result, Ok(()));
        assert!(access.is_held());
    }

    #[tokio::test]
    async fn test_acquire_ends_when_dequeued() {
        let BankHarness {
            mut access,
            responses,
            mut requests,
        } = bank_harness(Duration::from_secs(5)).await;
        // A stale grant must not mask the eviction
        responses
            .send(BankResponse::Granted {
                bot_id: "b1".into(),
                lease_id: 1,
            })
            .unwrap();

        let bank = async {
            let token = match next_request(&mut requests).await {
                BankRequest::Sync { token, .. } => token,
                other => panic!("expected sync, got {other:?}"),
            };
            responses
                .send(BankResponse::Synced {
                    bot_id: "b1".into(),
                    token,
                })
                .unwrap();
            next_request(&mut requests).await;
            responses
                .send(BankResponse::Queued {
                    bot_id: "b1".into(),
                    position: 1,
                })
                .unwrap();
            responses
                .send(BankResponse::Dequeued { bot_id: "b1".into() })
                .unwrap();
        };
        let cancel = CancelToken::new();
        let (result, ()) = tokio::join!(access.acquire(&cancel), bank);
        assert_eq!(result, Err(BankError::Evicted));
        assert!(!access.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_wait_is_bounded() {
        let BankHarness {
            mut access,
            responses,
            mut requests,
        } = bank_harness(Duration::from_millis(500)).await;

        let bank = async {
            let token = match next_request(&mut requests).await {
                BankRequest::Sync { token, .. } => token,
                other => panic!("expected sync, got {other:?}"),
            };
            responses
                .send(BankResponse::Synced {
                    bot_id: "b1".into(),
                    token,
                })
                .unwrap();
            next_request(&mut requests).await;
            responses
                .send(BankResponse::Queued {
                    bot_id: "b1".into(),
                    position: 1,
                })
                .unwrap();
        };
        let cancel = CancelToken::new();
        let (result, ()) = tokio::join!(access.acquire(&cancel), bank);
        assert!(matches!(result, Err(BankError::Unavailable(_))));
        assert!(matches!(
            next_request(&mut requests).await,
            BankRequest::Abandon { .. }
        ));
    }

    #[tokio::test]
    async fn test_lease_lost_while_reserving() {
        let BankHarness {
            mut access,
            responses,
            mut requests,
        } = bank_harness(Duration::from_secs(5)).await;
        access.held = true;
        responses
            .send(BankResponse::Released {
                bot_id: "b1".into(),
                next: None,
            })
            .unwrap();

        let amount = AssetAmount {
            asset: Asset::Gold,
            quantity: 5,
        };
        let result = access.reserve(&amount).await;
        assert_eq!(result, Err(BankError::Evicted));
        assert!(!access.is_held());
        assert!(matches!(
            next_request(&mut requests).await,
            BankRequest::Reserve { .. }
        ));
    }
}
