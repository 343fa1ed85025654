//! Bots
//!
//! One actor per game character. A bot announces its capabilities, executes
//! the tasks the orchestrator assigns and reports progress back.

pub mod bot;
pub mod executor;
pub mod game;
pub mod protocol;

pub use bot::{BotActor, BotHandle, BotMsg};
pub use executor::{plan, AssetAmount, BankAccess, BankError, BusBankAccess, ExecutionOutcome, Executor, Step};
pub use game::{Action, ActionOutcome, GameClient, SimulatedGameClient};
pub use protocol::{BankStanding, BotDirective, BotReport, BotStatusView};
