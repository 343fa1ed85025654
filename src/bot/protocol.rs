//! Bot wire protocol: directives on `bot.<id>.task`, reports on `bot.<id>.message`

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::orchestrator::TaskAssignment;

/// Orchestrator to bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotDirective {
    Assign { assignment: TaskAssignment },
    /// Cooperative abort; acknowledged by a `Failed { aborted: true }` report
    Abort { task_id: String },
}

/// Bot to orchestrator (and the control surface)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotReport {
    /// Announce or refresh presence
    Heartbeat {
        bot_id: String,
        capabilities: BTreeSet<String>,
    },
    Started {
        bot_id: String,
        task_id: String,
    },
    Completed {
        bot_id: String,
        task_id: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    Failed {
        bot_id: String,
        task_id: String,
        error: String,
        #[serde(default)]
        aborted: bool,
    },
    /// The bot is stopping
    Goodbye { bot_id: String, reason: String },
}

impl BotReport {
    pub fn bot_id(&self) -> &str {
        match self {
            BotReport::Heartbeat { bot_id, .. }
            | BotReport::Started { bot_id, .. }
            | BotReport::Completed { bot_id, .. }
            | BotReport::Failed { bot_id, .. }
            | BotReport::Goodbye { bot_id, .. } => bot_id,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            BotReport::Started { task_id, .. }
            | BotReport::Completed { task_id, .. }
            | BotReport::Failed { task_id, .. } => Some(task_id),
            BotReport::Heartbeat { .. } | BotReport::Goodbye { .. } => None,
        }
    }
}

/// Where a bot stands with the bank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankStanding {
    #[default]
    None,
    Waiting,
    Holding,
}

/// Answer to `BotMsg::GetStatus`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotStatusView {
    pub bot_id: String,
    pub current_task: Option<String>,
    pub queued: Vec<String>,
    pub bank: BankStanding,
}
