//! Orchestrator Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Failures a task may accumulate before it is abandoned
    pub retry_limit: u32,
    /// Maximum time without heartbeat before a bot is marked offline (ms)
    pub heartbeat_timeout_ms: u64,
    /// How often heartbeat deadlines are checked (ms)
    pub sweep_interval_ms: u64,
    /// Whether a task aborted on cancel request goes through the retry policy
    /// instead of being abandoned
    pub retry_aborted_tasks: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            heartbeat_timeout_ms: 15_000,
            sweep_interval_ms: 1_000,
            retry_aborted_tasks: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
