//! Orchestrator actor
//!
//! Wraps the `TaskBoard` in the actor runtime:
//!   - `orchestrator.command` envelopes become responses on `orchestrator.response`
//!   - `bot.*.message` reports drive the task lifecycle
//!   - the periodic tick runs the heartbeat sweep

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use super::board::TaskBoard;
use super::config::OrchestratorConfig;
use super::state::FleetSnapshot;
use crate::actor::{Actor, ActorContext, ActorHandle};
use crate::bus::topic::{BOT_MESSAGES, ORCHESTRATOR_COMMAND};
use crate::bus::{Envelope, Outbound, Payload};
use crate::error::{AssignmentConflict, ProtocolError, Result};
use crate::ui::UiEvent;

pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// Direct requests, used by the fleet owner and tests
pub enum OrchestratorMsg {
    Snapshot(oneshot::Sender<FleetSnapshot>),
    CheckInvariants(oneshot::Sender<Vec<AssignmentConflict>>),
}

pub type OrchestratorHandle = ActorHandle<OrchestratorActor>;

pub struct OrchestratorActor {
    board: TaskBoard,
}

impl OrchestratorActor {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            board: TaskBoard::new(config),
        }
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }

    async fn apply(&mut self, mut out: Vec<Outbound>, ctx: &ActorContext<OrchestratorMsg>) {
        out.extend(self.board.resolve_conflicts());
        ctx.publish_all(out).await;
    }
}

#[async_trait]
impl Actor for OrchestratorActor {
    type Msg = OrchestratorMsg;

    fn id(&self) -> &str {
        ORCHESTRATOR_ID
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![ORCHESTRATOR_COMMAND.to_string(), BOT_MESSAGES.to_string()]
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.board.config().sweep_interval())
    }

    async fn on_start(&mut self, ctx: &ActorContext<OrchestratorMsg>) -> Result<()> {
        let config = self.board.config();
        info!(
            retry_limit = config.retry_limit,
            heartbeat_timeout_ms = config.heartbeat_timeout_ms,
            "orchestrator online"
        );
        ctx.publish_all(vec![Outbound::ui(UiEvent::log(
            ORCHESTRATOR_ID,
            "orchestrator online",
        ))])
        .await;
        Ok(())
    }

    async fn on_envelope(
        &mut self,
        envelope: Envelope,
        ctx: &ActorContext<OrchestratorMsg>,
    ) -> Result<()> {
        match envelope.payload {
            Payload::Command(command) => {
                debug!(command = %envelope.id, sender = %envelope.sender_id, ?command, "command received");
                let out = self
                    .board
                    .handle_command(envelope.id, command, Instant::now());
                self.apply(out, ctx).await;
            }
            Payload::Report(report) => {
                if envelope.sender_id != report.bot_id() {
                    return Err(ProtocolError::SenderMismatch {
                        topic: envelope.topic.to_string(),
                        bot_id: report.bot_id().to_string(),
                    }
                    .into());
                }
                let out = self.board.handle_report(report, Instant::now())?;
                self.apply(out, ctx).await;
            }
            other => {
                debug!(topic = %envelope.topic, kind = other.kind_name(), "ignoring payload");
            }
        }
        Ok(())
    }

    async fn on_message(
        &mut self,
        msg: OrchestratorMsg,
        _ctx: &ActorContext<OrchestratorMsg>,
    ) -> Result<()> {
        match msg {
            OrchestratorMsg::Snapshot(reply) => {
                let _ = reply.send(self.board.snapshot(Instant::now()));
            }
            OrchestratorMsg::CheckInvariants(reply) => {
                let _ = reply.send(self.board.check_invariants());
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &ActorContext<OrchestratorMsg>) -> Result<()> {
        let out = self.board.sweep(Instant::now());
        if !out.is_empty() {
            self.apply(out, ctx).await;
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ActorContext<OrchestratorMsg>) {
        let stats = self.board.queue().stats();
        info!(queue = %stats, pending = self.board.pending().len(), "orchestrator stopped");
    }
}
