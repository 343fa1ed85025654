//! Bot actor
//!
//! Receives assignments on `bot.<id>.task`, runs them against its game
//! client and reports on `bot.<id>.message`. Execution happens in a spawned
//! task so the mailbox keeps draining aborts, bank responses and status
//! queries while a remote call is in flight.

use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::executor::{BankAccess, BusBankAccess, ExecutionOutcome, Executor};
use super::game::GameClient;
use super::protocol::{BankStanding, BotDirective, BotReport, BotStatusView};
use crate::actor::{Actor, ActorContext, ActorHandle, CancelToken};
use crate::bank::{BankRequest, BankResponse};
use crate::bus::topic::{bot_message, bot_task, BANK_REQUEST, BANK_RESPONSE};
use crate::bus::{Envelope, Outbound, Payload};
use crate::config::{BotConfig, BotSpec};
use crate::error::{ProtocolError, Result};
use crate::orchestrator::{TaskAssignment, ORCHESTRATOR_ID};
use crate::ui::UiEvent;
use crate::world::WorldData;

pub enum BotMsg {
    GetStatus(oneshot::Sender<BotStatusView>),
    /// Sent by the execution task when it ends
    Finished {
        task_id: String,
        outcome: ExecutionOutcome,
    },
}

pub type BotHandle = ActorHandle<BotActor>;

struct RunningTask {
    task_id: String,
    cancel: CancelToken,
    bank_tx: mpsc::UnboundedSender<BankResponse>,
}

pub struct BotActor {
    id: String,
    capabilities: BTreeSet<String>,
    config: BotConfig,
    client: Arc<dyn GameClient>,
    world: Arc<WorldData>,
    current: Option<RunningTask>,
    queued: VecDeque<TaskAssignment>,
    bank: BankStanding,
    stop_reason: Option<String>,
}

impl BotActor {
    pub fn new(
        spec: &BotSpec,
        config: BotConfig,
        client: Arc<dyn GameClient>,
        world: Arc<WorldData>,
    ) -> Self {
        Self {
            id: spec.id.clone(),
            capabilities: spec.capabilities.clone(),
            config,
            client,
            world,
            current: None,
            queued: VecDeque::new(),
            bank: BankStanding::None,
            stop_reason: None,
        }
    }

    pub fn status(&self) -> BotStatusView {
        BotStatusView {
            bot_id: self.id.clone(),
            current_task: self.current.as_ref().map(|r| r.task_id.clone()),
            queued: self.queued.iter().map(|a| a.task_id.clone()).collect(),
            bank: self.bank,
        }
    }

    fn knows(&self, task_id: &str) -> bool {
        self.current.as_ref().map(|r| r.task_id == task_id).unwrap_or(false)
            || self.queued.iter().any(|a| a.task_id == task_id)
    }

    async fn report(&self, ctx: &ActorContext<BotMsg>, report: BotReport) {
        if let Err(e) = ctx.publish(&bot_message(&self.id), Payload::Report(report)).await {
            warn!(bot_id = %self.id, error = %e, "report not published");
        }
    }

    async fn heartbeat(&self, ctx: &ActorContext<BotMsg>) {
        self.report(
            ctx,
            BotReport::Heartbeat {
                bot_id: self.id.clone(),
                capabilities: self.capabilities.clone(),
            },
        )
        .await;
    }

    async fn start_task(&mut self, assignment: TaskAssignment, ctx: &ActorContext<BotMsg>) {
        let task_id = assignment.task_id.clone();
        let cancel = CancelToken::new();
        let (bank_tx, bank_rx) = mpsc::unbounded_channel();
        self.current = Some(RunningTask {
            task_id: task_id.clone(),
            cancel: cancel.clone(),
            bank_tx,
        });

        info!(bot_id = %self.id, task_id = %task_id, kind = %assignment.kind, "task started");
        self.report(
            ctx,
            BotReport::Started {
                bot_id: self.id.clone(),
                task_id: task_id.clone(),
            },
        )
        .await;

        let executor = Executor::new(
            &self.id,
            self.client.clone(),
            self.world.clone(),
            self.config.clone(),
        );
        let mut bank = BusBankAccess::new(
            &self.id,
            ctx.bus().clone(),
            bank_rx,
            self.config.action_timeout(),
            self.config.bank_wait_timeout(),
        );
        let myself = ctx.myself();
        tokio::spawn(async move {
            let outcome = executor.run(&assignment, &mut bank, &cancel).await;
            if bank.is_held() {
                bank.release().await;
            }
            if let Err(e) = myself.tell(BotMsg::Finished { task_id, outcome }).await {
                debug!(error = %e, "bot gone before task finished");
            }
        });
    }

    async fn start_next(&mut self, ctx: &ActorContext<BotMsg>) {
        if self.current.is_none() {
            if let Some(next) = self.queued.pop_front() {
                self.start_task(next, ctx).await;
            }
        }
    }

    async fn on_directive(&mut self, directive: BotDirective, ctx: &ActorContext<BotMsg>) {
        match directive {
            BotDirective::Assign { assignment } => {
                if self.knows(&assignment.task_id) {
                    debug!(bot_id = %self.id, task_id = %assignment.task_id, "duplicate assignment ignored");
                } else if self.current.is_some() {
                    info!(bot_id = %self.id, task_id = %assignment.task_id, "busy, assignment queued");
                    self.queued.push_back(assignment);
                } else {
                    self.start_task(assignment, ctx).await;
                }
            }
            BotDirective::Abort { task_id } => {
                if let Some(running) = self.current.as_ref().filter(|r| r.task_id == task_id) {
                    info!(bot_id = %self.id, task_id = %task_id, "abort requested");
                    running.cancel.cancel();
                } else if let Some(index) = self.queued.iter().position(|a| a.task_id == task_id) {
                    self.queued.remove(index);
                    self.report(
                        ctx,
                        BotReport::Failed {
                            bot_id: self.id.clone(),
                            task_id,
                            error: "aborted before start".to_string(),
                            aborted: true,
                        },
                    )
                    .await;
                } else {
                    debug!(bot_id = %self.id, task_id = %task_id, "abort for unknown task ignored");
                }
            }
        }
    }

    async fn on_bank_response(&mut self, response: BankResponse, ctx: &ActorContext<BotMsg>) {
        if response.bot_id() != Some(self.id.as_str()) {
            return;
        }
        self.bank = match &response {
            BankResponse::Granted { .. } => BankStanding::Holding,
            BankResponse::Queued { .. } => BankStanding::Waiting,
            BankResponse::Released { .. } | BankResponse::Dequeued { .. } => BankStanding::None,
            _ => self.bank,
        };
        match &self.current {
            Some(running) => {
                let _ = running.bank_tx.send(response);
            }
            None if matches!(response, BankResponse::Granted { .. }) => {
                // Nothing can use the lease; hand it on
                warn!(bot_id = %self.id, ?response, "bank granted with no running task, releasing");
                let request = BankRequest::Release {
                    bot_id: self.id.clone(),
                };
                if let Err(e) = ctx.publish(BANK_REQUEST, Payload::BankRequest(request)).await {
                    warn!(bot_id = %self.id, error = %e, "bank release not published");
                }
            }
            None => debug!(bot_id = %self.id, ?response, "bank response without running task"),
        }
    }
}

#[async_trait]
impl Actor for BotActor {
    type Msg = BotMsg;

    fn id(&self) -> &str {
        &self.id
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![bot_task(&self.id), BANK_RESPONSE.to_string()]
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.config.heartbeat_interval())
    }

    async fn on_start(&mut self, ctx: &ActorContext<BotMsg>) -> Result<()> {
        info!(bot_id = %self.id, capabilities = ?self.capabilities, "bot online");
        self.heartbeat(ctx).await;
        Ok(())
    }

    async fn on_envelope(&mut self, envelope: Envelope, ctx: &ActorContext<BotMsg>) -> Result<()> {
        match envelope.payload {
            Payload::Directive(directive) => {
                if envelope.sender_id != ORCHESTRATOR_ID {
                    return Err(ProtocolError::Unauthorized {
                        sender: envelope.sender_id,
                        action: format!("direct bot {}", self.id),
                    }
                    .into());
                }
                self.on_directive(directive, ctx).await;
            }
            Payload::BankResponse(response) => self.on_bank_response(response, ctx).await,
            other => debug!(bot_id = %self.id, kind = other.kind_name(), "ignoring payload"),
        }
        Ok(())
    }

    async fn on_message(&mut self, msg: BotMsg, ctx: &ActorContext<BotMsg>) -> Result<()> {
        match msg {
            BotMsg::GetStatus(reply) => {
                let _ = reply.send(self.status());
            }
            BotMsg::Finished { task_id, outcome } => {
                if !self.current.as_ref().map(|r| r.task_id == task_id).unwrap_or(false) {
                    debug!(bot_id = %self.id, task_id = %task_id, "stale completion ignored");
                    return Ok(());
                }
                self.current = None;

                let (report, fatal) = match outcome {
                    ExecutionOutcome::Completed(result) => {
                        info!(bot_id = %self.id, task_id = %task_id, "task completed");
                        (
                            BotReport::Completed {
                                bot_id: self.id.clone(),
                                task_id,
                                result,
                            },
                            None,
                        )
                    }
                    ExecutionOutcome::Aborted => {
                        info!(bot_id = %self.id, task_id = %task_id, "task aborted");
                        (
                            BotReport::Failed {
                                bot_id: self.id.clone(),
                                task_id,
                                error: "aborted".to_string(),
                                aborted: true,
                            },
                            None,
                        )
                    }
                    ExecutionOutcome::Failed(e) => {
                        warn!(bot_id = %self.id, task_id = %task_id, error = %e, "task failed");
                        let fatal = e.is_fatal().then(|| e.to_string());
                        (
                            BotReport::Failed {
                                bot_id: self.id.clone(),
                                task_id,
                                error: e.to_string(),
                                aborted: false,
                            },
                            fatal,
                        )
                    }
                };
                self.report(ctx, report).await;

                if let Some(reason) = fatal {
                    error!(bot_id = %self.id, reason = %reason, "fatal game API error, stopping bot");
                    self.stop_reason = Some(format!("fatal error: {reason}"));
                    ctx.request_stop();
                } else {
                    self.start_next(ctx).await;
                }
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &ActorContext<BotMsg>) -> Result<()> {
        self.heartbeat(ctx).await;
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &ActorContext<BotMsg>) {
        if let Some(running) = self.current.take() {
            running.cancel.cancel();
        }
        let reason = self
            .stop_reason
            .take()
            .unwrap_or_else(|| "shutdown".to_string());
        self.report(
            ctx,
            BotReport::Goodbye {
                bot_id: self.id.clone(),
                reason: reason.clone(),
            },
        )
        .await;
        ctx.publish_all(vec![Outbound::ui(UiEvent::log(
            &self.id,
            format!("bot stopped: {reason}"),
        ))])
        .await;
        info!(bot_id = %self.id, reason = %reason, "bot stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorState;
    use crate::bot::game::SimulatedGameClient;
    use crate::bus::{ChannelSubscriber, MessageBus};
    use crate::error::CollaboratorError;
    use serde_json::json;

    fn assignment(task_id: &str) -> TaskAssignment {
        TaskAssignment {
            task_id: task_id.into(),
            kind: "gather".into(),
            priority: 0,
            payload: json!(null),
            attempt: 1,
        }
    }

    async fn bot(
        bus: &Arc<MessageBus>,
        client: SimulatedGameClient,
    ) -> (BotHandle, mpsc::UnboundedReceiver<Envelope>) {
        let (reports, rx) = ChannelSubscriber::new("reports");
        bus.subscribe(&bot_message("b1"), reports).await.unwrap();
        let actor = BotActor::new(
            &BotSpec::new("b1", ["mine"]),
            BotConfig::default(),
            Arc::new(client),
            Arc::new(WorldData::empty()),
        );
        let mut handle = ActorHandle::new(actor, bus.clone(), 16);
        handle.start().await.unwrap();
        (handle, rx)
    }

    async fn next_report(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> BotReport {
        match rx.recv().await.unwrap().payload {
            Payload::Report(report) => report,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    async fn direct(bus: &MessageBus, directive: BotDirective, sender: &str) {
        bus.publish(&bot_task("b1"), Payload::Directive(directive), sender)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_runs_assignment_and_reports() {
        let bus = Arc::new(MessageBus::default());
        let (mut handle, mut rx) = bot(&bus, SimulatedGameClient::new(Duration::from_millis(5))).await;
        assert!(matches!(next_report(&mut rx).await, BotReport::Heartbeat { .. }));

        direct(
            &bus,
            BotDirective::Assign {
                assignment: assignment("task-1"),
            },
            ORCHESTRATOR_ID,
        )
        .await;
        assert!(matches!(next_report(&mut rx).await, BotReport::Started { .. }));
        match next_report(&mut rx).await {
            BotReport::Completed { task_id, result, .. } => {
                assert_eq!(task_id, "task-1");
                assert_eq!(result["task_id"], "task-1");
            }
            other => panic!("unexpected report {other:?}"),
        }
        handle.stop().await;
        assert!(matches!(next_report(&mut rx).await, BotReport::Goodbye { .. }));
    }

    #[tokio::test]
    async fn test_directive_from_other_sender_ignored() {
        let bus = Arc::new(MessageBus::default());
        let (mut handle, mut rx) = bot(&bus, SimulatedGameClient::new(Duration::from_millis(5))).await;
        next_report(&mut rx).await;

        direct(
            &bus,
            BotDirective::Assign {
                assignment: assignment("task-1"),
            },
            "intruder",
        )
        .await;
        let status = handle
            .ask(BotMsg::GetStatus, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(status.current_task, None);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_abort_in_progress() {
        let bus = Arc::new(MessageBus::default());
        let (mut handle, mut rx) = bot(&bus, SimulatedGameClient::new(Duration::from_secs(30))).await;
        next_report(&mut rx).await;

        direct(
            &bus,
            BotDirective::Assign {
                assignment: assignment("task-1"),
            },
            ORCHESTRATOR_ID,
        )
        .await;
        assert!(matches!(next_report(&mut rx).await, BotReport::Started { .. }));
        direct(
            &bus,
            BotDirective::Abort {
                task_id: "task-1".into(),
            },
            ORCHESTRATOR_ID,
        )
        .await;
        assert!(matches!(
            next_report(&mut rx).await,
            BotReport::Failed { aborted: true, .. }
        ));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_fatal_error_stops_bot() {
        let bus = Arc::new(MessageBus::default());
        let client = SimulatedGameClient::new(Duration::from_millis(5))
            .with_failures([CollaboratorError::from_code(452, "token invalid")]);
        let (mut handle, mut rx) = bot(&bus, client).await;
        next_report(&mut rx).await;

        direct(
            &bus,
            BotDirective::Assign {
                assignment: assignment("task-1"),
            },
            ORCHESTRATOR_ID,
        )
        .await;
        next_report(&mut rx).await;
        assert!(matches!(
            next_report(&mut rx).await,
            BotReport::Failed { aborted: false, .. }
        ));
        match next_report(&mut rx).await {
            BotReport::Goodbye { reason, .. } => assert!(reason.contains("452")),
            other => panic!("unexpected report {other:?}"),
        }
        tokio::time::timeout(Duration::from_secs(1), handle.stopped())
            .await
            .unwrap();
        assert_eq!(handle.state(), ActorState::Stopped);
    }

    #[tokio::test]
    async fn test_grant_without_running_task_is_released() {
        let bus = Arc::new(MessageBus::default());
        let (requests, mut bank_rx) = ChannelSubscriber::new("bank");
        bus.subscribe(BANK_REQUEST, requests).await.unwrap();
        let (mut handle, mut rx) = bot(&bus, SimulatedGameClient::new(Duration::from_millis(5))).await;
        next_report(&mut rx).await;

        bus.publish(
            BANK_RESPONSE,
            Payload::BankResponse(BankResponse::Granted {
                bot_id: "b1".into(),
                lease_id: 3,
            }),
            "bank",
        )
        .await
        .unwrap();

        let request = tokio::time::timeout(Duration::from_secs(1), bank_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.sender_id, "b1");
        assert_eq!(
            request.payload,
            Payload::BankRequest(BankRequest::Release { bot_id: "b1".into() })
        );
        handle.stop().await;
    }
}
