use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the fleet coordination core
#[derive(Error, Debug)]
pub enum FleetError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Coordination errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Assignment conflict: {0}")]
    Assignment(#[from] AssignmentConflict),

    #[error("Bank violation: {0}")]
    Bank(#[from] BankViolation),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Offline timeout: {0}")]
    Offline(#[from] OfflineTimeout),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    // World data errors
    #[error("Not found: {0}")]
    NotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

/// Malformed messages, topics and unauthorized senders
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("topic {topic:?} contains an empty segment")]
    EmptySegment { topic: String },

    #[error("wildcard is not allowed in a concrete topic: {topic:?}")]
    WildcardInTopic { topic: String },

    #[error("payload kind {kind} is not accepted on topic {topic}")]
    PayloadMismatch { topic: String, kind: String },

    #[error("report for bot {bot_id} published on foreign topic {topic}")]
    SenderMismatch { topic: String, bot_id: String },

    #[error("sender {sender} is not allowed to {action}")]
    Unauthorized { sender: String, action: String },

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Internal-consistency violations between task and bot records
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentConflict {
    #[error("task {task_id} is already bound to bot {assignee}")]
    TaskAlreadyAssigned { task_id: String, assignee: String },

    #[error("bot {bot_id} is already busy with task {task_id}")]
    BotAlreadyBusy { bot_id: String, task_id: String },

    #[error("bot {bot_id} reported on task {task_id} it does not own")]
    NotAssignee { task_id: String, bot_id: String },

    #[error("task {task_id} points to bot {bot_id} which does not point back")]
    Dangling { task_id: String, bot_id: String },

    #[error("task {task_id} is {status} without an assignee")]
    MissingAssignee { task_id: String, status: String },

    #[error("bot {bot_id} is busy without a current task")]
    BusyWithoutTask { bot_id: String },
}

/// Bank protocol violations (rejected at the boundary, never fatal)
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankViolation {
    #[error("bot {bot_id} is not the lease holder (holder: {holder:?})")]
    NotHolder {
        bot_id: String,
        holder: Option<String>,
    },

    #[error("bot {bot_id} already holds or waits for the bank")]
    DoubleAcquire { bot_id: String },

    #[error("insufficient {asset}: requested {requested}, available {available}")]
    Insufficient {
        asset: String,
        requested: u64,
        available: u64,
    },

    #[error("reservation not found: {0}")]
    UnknownReservation(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(u64),
}

/// How a bot reacts to a failure reported by the remote game API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBehavior {
    /// Stop the bot
    Fatal,
    /// Fail the task; corrective work is needed before it can succeed
    Recoverable,
    /// Wait and retry the same action
    Retriable,
    /// Fail the task
    Normal,
}

impl std::fmt::Display for ErrorBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorBehavior::Fatal => write!(f, "fatal"),
            ErrorBehavior::Recoverable => write!(f, "recoverable"),
            ErrorBehavior::Retriable => write!(f, "retriable"),
            ErrorBehavior::Normal => write!(f, "normal"),
        }
    }
}

// Remote API error codes that change bot behavior
const FATAL_CODES: &[u16] = &[451, 452, 453, 454, 1000, 1001, 1002, 1003, 1004];
const RECOVERABLE_CODES: &[u16] = &[462, 497];
const RETRIABLE_CODES: &[u16] = &[436, 461, 499];

/// Failure of the external game API collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code}] {message} ({behavior})")]
pub struct CollaboratorError {
    pub code: u16,
    pub message: String,
    pub behavior: ErrorBehavior,
}

impl CollaboratorError {
    /// Classify a remote error response by its code
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        let behavior = if FATAL_CODES.contains(&code) {
            ErrorBehavior::Fatal
        } else if RECOVERABLE_CODES.contains(&code) {
            ErrorBehavior::Recoverable
        } else if RETRIABLE_CODES.contains(&code) {
            ErrorBehavior::Retriable
        } else {
            ErrorBehavior::Normal
        };
        Self {
            code,
            message: message.into(),
            behavior,
        }
    }

    /// Local failure that never reached the remote server (timeouts, planning)
    pub fn local(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            behavior: ErrorBehavior::Normal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.behavior == ErrorBehavior::Fatal
    }

    pub fn is_retriable(&self) -> bool {
        self.behavior == ErrorBehavior::Retriable
    }
}

/// Heartbeat lapse of a bot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("bot {bot_id} silent for {silent_for_ms}ms (limit {limit_ms}ms)")]
pub struct OfflineTimeout {
    pub bot_id: String,
    pub silent_for_ms: u64,
    pub limit_ms: u64,
}

/// Actor lifecycle and mailbox errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActorError {
    #[error("actor {0} is already running")]
    AlreadyRunning(String),

    #[error("actor {0} was already stopped")]
    AlreadyStopped(String),

    #[error("actor {0} is not running")]
    NotRunning(String),

    #[error("mailbox of actor {0} is closed")]
    MailboxClosed(String),

    #[error("mailbox of actor {0} is full")]
    MailboxFull(String),

    #[error("actor {actor} did not answer within {timeout_ms}ms")]
    AskTimeout { actor: String, timeout_ms: u64 },

    #[error("actor {0} dropped the reply")]
    ReplyDropped(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_classification() {
        assert_eq!(
            CollaboratorError::from_code(452, "token invalid").behavior,
            ErrorBehavior::Fatal
        );
        assert_eq!(
            CollaboratorError::from_code(497, "inventory full").behavior,
            ErrorBehavior::Recoverable
        );
        assert_eq!(
            CollaboratorError::from_code(499, "cooldown").behavior,
            ErrorBehavior::Retriable
        );
        assert_eq!(
            CollaboratorError::from_code(598, "content not found").behavior,
            ErrorBehavior::Normal
        );
    }

    #[test]
    fn test_error_messages_carry_ids() {
        let err = BankViolation::NotHolder {
            bot_id: "bot-2".into(),
            holder: Some("bot-1".into()),
        };
        assert!(err.to_string().contains("bot-2"));
        assert!(err.to_string().contains("bot-1"));

        let err: FleetError = ActorError::AskTimeout {
            actor: "bank".into(),
            timeout_ms: 50,
        }
        .into();
        assert!(err.to_string().contains("50ms"));
    }
}
