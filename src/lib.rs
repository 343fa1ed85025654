pub mod actor;
pub mod bank;
pub mod bot;
pub mod bus;
pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod orchestrator;
pub mod ui;
pub mod world;

pub use actor::{Actor, ActorContext, ActorHandle, ActorRef, ActorState, CancelToken};
pub use bank::{BankActor, BankHandle, BankRequest, BankResponse, BankSnapshot, BANK_ID};
pub use bot::{BotActor, BotDirective, BotHandle, BotReport, GameClient, SimulatedGameClient};
pub use bus::{ChannelSubscriber, Envelope, MessageBus, Outbound, Payload, Subscriber, Topic};
pub use config::{BotSpec, FleetConfig};
pub use error::{FleetError, Result};
pub use fleet::{Fleet, CONTROL_ID};
pub use orchestrator::{
    Command, CommandResponse, FleetSnapshot, OrchestratorActor, OrchestratorHandle, Task,
    TaskSpec, TaskStatus, ORCHESTRATOR_ID,
};
pub use ui::{AlertLevel, UiEvent};
pub use world::{Entity, WorldData};
