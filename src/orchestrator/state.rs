//! Bot registry records and the snapshot served to the control surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tokio::time::Instant;

use super::queue::QueueStats;
use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Idle,
    Busy,
    Offline,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Idle => write!(f, "idle"),
            Availability::Busy => write!(f, "busy"),
            Availability::Offline => write!(f, "offline"),
        }
    }
}

/// Orchestrator-owned view of one bot
#[derive(Debug, Clone)]
pub struct BotRecord {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub availability: Availability,
    pub current_task: Option<String>,
    pub last_heartbeat: Instant,
    /// Stamped when the bot last became idle; lower means idle longer
    pub idle_seq: u64,
    pub registered_at: DateTime<Utc>,
}

impl BotRecord {
    pub fn can_run(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn view(&self, now: Instant) -> BotView {
        BotView {
            id: self.id.clone(),
            capabilities: self.capabilities.clone(),
            availability: self.availability,
            current_task: self.current_task.clone(),
            silent_for_ms: now.saturating_duration_since(self.last_heartbeat).as_millis() as u64,
            registered_at: self.registered_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotView {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub availability: Availability,
    pub current_task: Option<String>,
    pub silent_for_ms: u64,
    pub registered_at: DateTime<Utc>,
}

/// Point-in-time copy of the orchestrator state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// Live tasks, pending ones in assignment order first
    pub tasks: Vec<Task>,
    /// Tasks that reached a terminal status
    pub archived: Vec<Task>,
    pub bots: Vec<BotView>,
    pub queue: QueueStats,
    pub taken_at: DateTime<Utc>,
}

impl FleetSnapshot {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks
            .iter()
            .chain(self.archived.iter())
            .find(|t| t.id == task_id)
    }

    pub fn bot(&self, bot_id: &str) -> Option<&BotView> {
        self.bots.iter().find(|b| b.id == bot_id)
    }

    /// Tasks not yet in a terminal status
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }
}
