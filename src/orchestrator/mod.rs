//! Orchestrator
//!
//! Owns every task and the bot registry. Tasks are assigned to idle bots
//! whose capabilities cover the task's requirements, highest priority first.
//! Failures are retried up to a limit, silent bots are taken offline and
//! their tasks reclaimed.

pub mod board;
pub mod command;
pub mod config;
pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod task;

pub use board::TaskBoard;
pub use command::{Command, CommandError, CommandResponse};
pub use config::OrchestratorConfig;
pub use orchestrator::{OrchestratorActor, OrchestratorHandle, OrchestratorMsg, ORCHESTRATOR_ID};
pub use queue::{QueueStats, TaskQueue};
pub use state::{Availability, BotRecord, BotView, FleetSnapshot};
pub use task::{Task, TaskAssignment, TaskSpec, TaskStatus};
