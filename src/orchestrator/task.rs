//! Task records owned by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Bound to a bot, not yet started
    Assigned,
    /// Bot reported it started
    InProgress,
    Completed,
    /// Transient: re-enqueued or abandoned right after
    Failed,
    /// Retry limit exceeded or internal conflict
    Abandoned,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Abandoned | TaskStatus::Cancelled
        )
    }

    /// Statuses that require exactly one assignee
    pub fn is_bound(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Abandoned => write!(f, "abandoned"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the control surface asks for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(kind: &str, priority: u32) -> Self {
        Self {
            kind: kind.to_string(),
            priority,
            required_capabilities: BTreeSet::new(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn requires(mut self, capability: &str) -> Self {
        self.required_capabilities.insert(capability.to_string());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: String,
    /// Higher is more urgent
    pub priority: u32,
    pub required_capabilities: BTreeSet<String>,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    /// Failed attempts so far (offline reclamation does not count)
    pub failures: u32,
    pub last_error: Option<String>,
    /// Cancel asked while the bot was running it
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: String, spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: spec.kind,
            priority: spec.priority,
            required_capabilities: spec.required_capabilities,
            payload: spec.payload,
            status: TaskStatus::Pending,
            assignee: None,
            failures: 0,
            last_error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn assignment(&self) -> TaskAssignment {
        TaskAssignment {
            task_id: self.id.clone(),
            kind: self.kind.clone(),
            priority: self.priority,
            payload: self.payload.clone(),
            attempt: self.failures + 1,
        }
    }
}

/// What a bot receives on `bot.<id>.task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub kind: String,
    pub priority: u32,
    pub payload: serde_json::Value,
    /// 1-based attempt number
    pub attempt: u32,
}
