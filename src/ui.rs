//! Status events broadcast on `ui.*` for the control surface

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bus::topic::{UI_ALERT, UI_BANK, UI_LOG, UI_QUEUE, UI_TASK};
use crate::orchestrator::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// Task status transition (`ui.task`)
    TaskUpdate {
        task_id: String,
        status: TaskStatus,
        assignee: Option<String>,
        failures: u32,
        error: Option<String>,
    },
    /// Queue depth after a change (`ui.queue`)
    QueueDepth {
        pending: usize,
        assigned: usize,
        in_progress: usize,
    },
    /// Bank occupancy after a change (`ui.bank`)
    BankOccupancy {
        holder: Option<String>,
        waiting: Vec<String>,
    },
    /// Free-form log line from an actor (`ui.log`)
    Log { source: String, message: String },
    /// Operator-facing alert (`ui.alert`)
    Alert {
        source: String,
        level: AlertLevel,
        message: String,
    },
}

impl UiEvent {
    /// Topic this event is broadcast on
    pub fn topic(&self) -> &'static str {
        match self {
            UiEvent::TaskUpdate { .. } => UI_TASK,
            UiEvent::QueueDepth { .. } => UI_QUEUE,
            UiEvent::BankOccupancy { .. } => UI_BANK,
            UiEvent::Log { .. } => UI_LOG,
            UiEvent::Alert { .. } => UI_ALERT,
        }
    }

    pub fn log(source: &str, message: impl Into<String>) -> Self {
        UiEvent::Log {
            source: source.to_string(),
            message: message.into(),
        }
    }

    pub fn alert(source: &str, level: AlertLevel, message: impl Into<String>) -> Self {
        UiEvent::Alert {
            source: source.to_string(),
            level,
            message: message.into(),
        }
    }
}
