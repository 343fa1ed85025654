//! Fleet bootstrap
//!
//! Wires the bus, the bank, the orchestrator and one actor per configured
//! bot, and tears them down in reverse order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::actor::ActorHandle;
use crate::bank::{BankActor, BankHandle, BankMsg, BankSnapshot};
use crate::bot::{BotActor, BotHandle, BotMsg, BotStatusView, GameClient};
use crate::bus::topic::{ORCHESTRATOR_COMMAND, ORCHESTRATOR_RESPONSE};
use crate::bus::{ChannelSubscriber, Envelope, MessageBus, Payload, Topic};
use crate::config::{BotSpec, FleetConfig};
use crate::error::{ActorError, AssignmentConflict, FleetError, Result};
use crate::orchestrator::{
    Command, CommandResponse, FleetSnapshot, OrchestratorActor, OrchestratorHandle,
    OrchestratorMsg,
};
use crate::world::WorldData;

/// Sender id used by the operator control surface
pub const CONTROL_ID: &str = "control";

const ASK_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(50);

/// A running fleet
pub struct Fleet {
    config: FleetConfig,
    bus: Arc<MessageBus>,
    bank: BankHandle,
    orchestrator: OrchestratorHandle,
    bots: BTreeMap<String, BotHandle>,
}

impl Fleet {
    /// Validate `config` and start every actor. `client_for` builds the game
    /// client of each bot.
    pub async fn start<F>(
        config: FleetConfig,
        world: Arc<WorldData>,
        client_for: F,
    ) -> Result<Self>
    where
        F: Fn(&BotSpec) -> Arc<dyn GameClient>,
    {
        config
            .validate()
            .map_err(|errors| FleetError::InvalidConfig(errors.join("; ")))?;

        let bus = Arc::new(MessageBus::new(config.bus.clone()));

        let mut bank = ActorHandle::new(
            BankActor::new(config.bank.clone()),
            bus.clone(),
            config.mailbox.bank_capacity,
        );
        bank.start().await?;

        let mut orchestrator = ActorHandle::new(
            OrchestratorActor::new(config.orchestrator.clone()),
            bus.clone(),
            config.mailbox.orchestrator_capacity,
        );
        orchestrator.start().await?;

        let mut fleet = Self {
            config: config.clone(),
            bus,
            bank,
            orchestrator,
            bots: BTreeMap::new(),
        };

        for spec in &config.bots {
            let client = client_for(spec);
            if let Err(e) = fleet.add_bot(spec, client, world.clone()).await {
                fleet.shutdown().await;
                return Err(e);
            }
        }

        info!(
            bots = fleet.bots.len(),
            retry_limit = config.orchestrator.retry_limit,
            "fleet started"
        );
        Ok(fleet)
    }

    /// Start one more bot on the running fleet
    pub async fn add_bot(
        &mut self,
        spec: &BotSpec,
        client: Arc<dyn GameClient>,
        world: Arc<WorldData>,
    ) -> Result<()> {
        if self.bots.contains_key(&spec.id) {
            return Err(FleetError::InvalidConfig(format!(
                "duplicate bot id {}",
                spec.id
            )));
        }
        let mut handle = ActorHandle::new(
            BotActor::new(spec, self.config.bot.clone(), client, world),
            self.bus.clone(),
            self.config.mailbox.bot_capacity,
        );
        handle.start().await?;
        self.bots.insert(spec.id.clone(), handle);
        Ok(())
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn orchestrator(&self) -> &OrchestratorHandle {
        &self.orchestrator
    }

    pub fn bank(&self) -> &BankHandle {
        &self.bank
    }

    pub fn bot(&self, bot_id: &str) -> Option<&BotHandle> {
        self.bots.get(bot_id)
    }

    pub fn bot_ids(&self) -> impl Iterator<Item = &str> {
        self.bots.keys().map(String::as_str)
    }

    /// Publish a command as the control surface and wait for its correlated response
    pub async fn submit(&self, command: Command) -> Result<CommandResponse> {
        let (subscriber, mut rx) = ChannelSubscriber::new(CONTROL_ID);
        let subscription = self.bus.subscribe(ORCHESTRATOR_RESPONSE, subscriber).await?;

        let envelope = Envelope::new(
            Topic::parse(ORCHESTRATOR_COMMAND)?,
            Payload::Command(command),
            CONTROL_ID,
        );
        let command_id = envelope.id;

        let exchange = async {
            self.bus.publish_envelope(envelope).await?;
            while let Some(envelope) = rx.recv().await {
                if let Payload::CommandResponse(response) = envelope.payload {
                    if response.in_reply_to() == command_id {
                        return Ok(response);
                    }
                }
            }
            Err(FleetError::Internal("response channel closed".to_string()))
        };
        let result = tokio::time::timeout(ASK_TIMEOUT, exchange)
            .await
            .unwrap_or_else(|_| {
                Err(ActorError::AskTimeout {
                    actor: ORCHESTRATOR_COMMAND.to_string(),
                    timeout_ms: ASK_TIMEOUT.as_millis() as u64,
                }
                .into())
            });
        self.bus.unsubscribe(subscription).await;
        result
    }

    pub async fn snapshot(&self) -> Result<FleetSnapshot> {
        self.orchestrator
            .ask(OrchestratorMsg::Snapshot, ASK_TIMEOUT)
            .await
    }

    pub async fn bank_snapshot(&self) -> Result<BankSnapshot> {
        self.bank.ask(BankMsg::Snapshot, ASK_TIMEOUT).await
    }

    pub async fn check_invariants(&self) -> Result<Vec<AssignmentConflict>> {
        self.orchestrator
            .ask(OrchestratorMsg::CheckInvariants, ASK_TIMEOUT)
            .await
    }

    pub async fn bot_status(&self, bot_id: &str) -> Result<BotStatusView> {
        let handle = self
            .bots
            .get(bot_id)
            .ok_or_else(|| FleetError::NotFound(format!("bot {}", bot_id)))?;
        handle.ask(BotMsg::GetStatus, ASK_TIMEOUT).await
    }

    /// Wait until every task known to the orchestrator is terminal
    pub async fn wait_idle(&self, timeout: Duration) -> Result<FleetSnapshot> {
        let wait = async {
            loop {
                let snapshot = self.snapshot().await?;
                if snapshot.outstanding() == 0 {
                    return Ok(snapshot);
                }
                tokio::time::sleep(IDLE_POLL).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(FleetError::Internal(format!(
                "tasks still outstanding after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Stop bots first so their goodbyes still reach the orchestrator and the
    /// bank, then the orchestrator, then the bank
    pub async fn shutdown(mut self) {
        info!("fleet shutting down");
        for (bot_id, handle) in self.bots.iter_mut() {
            handle.stop().await;
            info!(bot_id = %bot_id, "bot stopped");
        }
        self.orchestrator.stop().await;
        self.bank.stop().await;

        let stats = self.bus.stats().await;
        if stats.failed > 0 || stats.rejected > 0 {
            warn!(
                failed = stats.failed,
                rejected = stats.rejected,
                "bus reported delivery problems"
            );
        }
        self.bus.log_stats().await;
        info!("fleet shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::SimulatedGameClient;
    use crate::orchestrator::{TaskSpec, TaskStatus};

    fn config(bots: Vec<BotSpec>) -> FleetConfig {
        let mut config = FleetConfig::default();
        config.bot.heartbeat_interval_ms = 100;
        config.orchestrator.heartbeat_timeout_ms = 1_000;
        config.bots = bots;
        config
    }

    fn simulated(_: &BotSpec) -> Arc<dyn GameClient> {
        Arc::new(SimulatedGameClient::new(Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let bots = vec![BotSpec::new("a", ["mine"]), BotSpec::new("a", ["fish"])];
        let result = Fleet::start(config(bots), Arc::new(WorldData::empty()), simulated).await;
        assert!(matches!(result, Err(FleetError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let fleet = Fleet::start(
            config(vec![BotSpec::new("miner", ["mine"])]),
            Arc::new(WorldData::empty()),
            simulated,
        )
        .await
        .unwrap();

        let response = fleet
            .submit(Command::enqueue(TaskSpec::new("gather", 1).requires("mine")))
            .await
            .unwrap();
        let CommandResponse::Enqueued { task_id, .. } = response else {
            panic!("unexpected response {:?}", response);
        };

        let snapshot = fleet.wait_idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(snapshot.task(&task_id).unwrap().status, TaskStatus::Completed);
        assert!(fleet.check_invariants().await.unwrap().is_empty());
        fleet.shutdown().await;
    }

    #[tokio::test]
    async fn test_bot_status_unknown_bot() {
        let fleet = Fleet::start(config(vec![]), Arc::new(WorldData::empty()), simulated)
            .await
            .unwrap();
        assert!(matches!(
            fleet.bot_status("ghost").await,
            Err(FleetError::NotFound(_))
        ));
        fleet.shutdown().await;
    }
}
