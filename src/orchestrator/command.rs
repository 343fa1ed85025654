//! Orchestrator Commands - control surface requests and their responses

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use super::state::FleetSnapshot;
use super::task::{TaskSpec, TaskStatus};

/// Commands accepted on `orchestrator.command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Queue a new task
    EnqueueTask {
        task_kind: String,
        #[serde(default)]
        priority: u32,
        #[serde(default)]
        required_capabilities: BTreeSet<String>,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Cancel a pending, assigned or running task
    CancelTask { task_id: String },
    /// Publish a full state snapshot
    QueryState,
}

impl Command {
    pub fn enqueue(spec: TaskSpec) -> Self {
        Command::EnqueueTask {
            task_kind: spec.kind,
            priority: spec.priority,
            required_capabilities: spec.required_capabilities,
            payload: spec.payload,
        }
    }

    pub fn cancel(task_id: &str) -> Self {
        Command::CancelTask {
            task_id: task_id.to_string(),
        }
    }
}

/// Typed rejection published back on `orchestrator.response`
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum CommandError {
    #[error("malformed command: {reason}")]
    Malformed { reason: String },

    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },

    #[error("task {task_id} is already {status}")]
    AlreadyTerminal { task_id: String, status: TaskStatus },
}

/// Responses published on `orchestrator.response`, correlated by the
/// command envelope id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResponse {
    Enqueued {
        in_reply_to: Uuid,
        task_id: String,
    },
    /// `status` is `cancelled`, or `in_progress` while the bot acknowledges the abort
    CancelAccepted {
        in_reply_to: Uuid,
        task_id: String,
        status: TaskStatus,
    },
    State {
        in_reply_to: Uuid,
        snapshot: FleetSnapshot,
    },
    Rejected {
        in_reply_to: Uuid,
        error: CommandError,
    },
}

impl CommandResponse {
    pub fn in_reply_to(&self) -> Uuid {
        match self {
            CommandResponse::Enqueued { in_reply_to, .. }
            | CommandResponse::CancelAccepted { in_reply_to, .. }
            | CommandResponse::State { in_reply_to, .. }
            | CommandResponse::Rejected { in_reply_to, .. } => *in_reply_to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"enqueue_task","task_kind":"mine","required_capabilities":["mine"]}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::enqueue(TaskSpec::new("mine", 0).requires("mine"))
        );

        let query: Command = serde_json::from_str(r#"{"type":"query_state"}"#).unwrap();
        assert_eq!(query, Command::QueryState);
    }

    #[test]
    fn test_rejection_serializes_with_code() {
        let error = CommandError::UnknownTask {
            task_id: "task-9".into(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["code"], "unknown_task");
        assert_eq!(json["task_id"], "task-9");
    }
}
