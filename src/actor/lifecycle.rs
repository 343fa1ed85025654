//! Actor lifecycle states and cooperative cancellation tokens

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Actor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorState {
    /// Built but not started
    Created,
    /// Run loop is draining the mailbox
    Running,
    /// Stop signalled; the in-flight reaction is finishing
    StopRequested,
    /// Unsubscribed and mailbox released
    Stopped,
}

impl ActorState {
    /// Check if the actor can still be started
    pub fn can_start(&self) -> bool {
        matches!(self, ActorState::Created)
    }

    /// Check if the actor is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorState::Stopped)
    }
}

impl std::fmt::Display for ActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorState::Created => write!(f, "created"),
            ActorState::Running => write!(f, "running"),
            ActorState::StopRequested => write!(f, "stop_requested"),
            ActorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cooperative cancellation flag handed to blocking collaborator calls.
///
/// Cancelling is sticky and idempotent; every clone observes it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_state_predicates() {
        assert!(ActorState::Created.can_start());
        assert!(!ActorState::Running.can_start());
        assert!(ActorState::Stopped.is_terminal());
        assert!(!ActorState::StopRequested.is_terminal());
        assert_eq!(ActorState::StopRequested.to_string(), "stop_requested");
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(token.is_cancelled());
    }
}
