//! Game API collaborator
//!
//! One client per bot. Calls receive the task's cancel token; a client may
//! use it to cut a wait short but an in-flight remote call is never killed
//! from outside.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::actor::CancelToken;
use crate::error::CollaboratorError;
use crate::world::Entity;

/// One remote game action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// World entity the action is aimed at
    #[serde(default)]
    pub target: Option<Entity>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: serde_json::Value::Null,
            target: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Server-imposed cooldown before the next action
    #[serde(default)]
    pub cooldown_ms: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GameClient: Send + Sync {
    async fn execute(
        &self,
        action: &Action,
        cancel: &CancelToken,
    ) -> Result<ActionOutcome, CollaboratorError>;
}

/// In-process stand-in for the remote API with fixed latency and scripted failures
pub struct SimulatedGameClient {
    latency: Duration,
    failures: Mutex<VecDeque<CollaboratorError>>,
    calls: AtomicUsize,
}

impl SimulatedGameClient {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next calls with these errors, in order
    pub fn with_failures<I>(self, failures: I) -> Self
    where
        I: IntoIterator<Item = CollaboratorError>,
    {
        Self {
            failures: Mutex::new(failures.into_iter().collect()),
            ..self
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GameClient for SimulatedGameClient {
    async fn execute(
        &self,
        action: &Action,
        cancel: &CancelToken,
    ) -> Result<ActionOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = cancel.cancelled() => {
                return Err(CollaboratorError::local(format!("{} interrupted", action.name)));
            }
        }

        if let Some(error) = self.failures.lock().await.pop_front() {
            debug!(action = %action.name, error = %error, "scripted failure");
            return Err(error);
        }
        Ok(ActionOutcome {
            action: action.name.clone(),
            data: serde_json::json!({
                "params": action.params,
                "target": action.target.as_ref().map(|t| t.id.clone()),
            }),
            cooldown_ms: 0,
        })
    }
}
