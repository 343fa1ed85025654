use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::orchestrator::OrchestratorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub bus: BusConfig,
    pub mailbox: MailboxConfig,
    pub orchestrator: OrchestratorConfig,
    pub bank: BankConfig,
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    /// Bots to start, each with its declared capabilities
    pub bots: Vec<BotSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Messages kept per topic for `history()`
    pub history_limit: usize,
    /// Upper bound on a single handler delivery (ms)
    pub handler_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            handler_timeout_ms: 2_000,
        }
    }
}

impl BusConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }
}

/// Bounded mailbox capacities per actor role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub bot_capacity: usize,
    pub orchestrator_capacity: usize,
    pub bank_capacity: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            bot_capacity: 64,
            orchestrator_capacity: 1024,
            bank_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    /// Lease age that triggers an overdue warning (ms); leases are never revoked
    pub lease_ceiling_ms: u64,
    /// How often lease age is checked (ms)
    pub check_interval_ms: u64,
    /// Gold in the ledger at startup
    pub initial_gold: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            lease_ceiling_ms: 30_000,
            check_interval_ms: 1_000,
            initial_gold: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Heartbeat period (ms); must be well below the orchestrator's heartbeat timeout
    pub heartbeat_interval_ms: u64,
    /// Upper bound on one game API call (ms)
    pub action_timeout_ms: u64,
    /// Attempts for a retriable API error before the task fails
    pub retriable_attempts: u32,
    /// Delay between retriable attempts (ms)
    pub retry_backoff_ms: u64,
    /// Longest a task waits in the bank queue before giving up (ms)
    pub bank_wait_timeout_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            action_timeout_ms: 30_000,
            retriable_attempts: 3,
            retry_backoff_ms: 500,
            bank_wait_timeout_ms: 120_000,
        }
    }
}

impl BotConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn bank_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.bank_wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for the daily rolling log file (disabled when unset)
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BotSpec {
    pub id: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl BotSpec {
    pub fn new<I, S>(id: &str, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BOTFLEET_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BOTFLEET__BANK__LEASE_CEILING_MS, etc.)
            .add_source(
                Environment::with_prefix("BOTFLEET")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.mailbox.bot_capacity == 0
            || self.mailbox.orchestrator_capacity == 0
            || self.mailbox.bank_capacity == 0
        {
            errors.push("mailbox capacities must be positive".to_string());
        }

        if self.bus.handler_timeout_ms == 0 {
            errors.push("bus.handler_timeout_ms must be positive".to_string());
        }

        for (name, period) in [
            ("bot.heartbeat_interval_ms", self.bot.heartbeat_interval_ms),
            ("bank.check_interval_ms", self.bank.check_interval_ms),
            ("orchestrator.sweep_interval_ms", self.orchestrator.sweep_interval_ms),
            ("bot.bank_wait_timeout_ms", self.bot.bank_wait_timeout_ms),
        ] {
            if period == 0 {
                errors.push(format!("{name} must be positive"));
            }
        }

        if self.bot.heartbeat_interval_ms >= self.orchestrator.heartbeat_timeout_ms {
            errors.push(format!(
                "bot.heartbeat_interval_ms ({}) must be below orchestrator.heartbeat_timeout_ms ({})",
                self.bot.heartbeat_interval_ms, self.orchestrator.heartbeat_timeout_ms
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.bots {
            if spec.id.is_empty() || spec.id.contains('.') || spec.id == "*" {
                errors.push(format!("invalid bot id {:?}", spec.id));
            }
            if !seen.insert(spec.id.as_str()) {
                errors.push(format!("duplicate bot id {}", spec.id));
            }
            if spec.capabilities.iter().any(|c| c.trim().is_empty()) {
                errors.push(format!("bot {} declares an empty capability", spec.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.retry_limit, 3);
        assert_eq!(config.mailbox.bot_capacity, 64);
        assert_eq!(config.bus.handler_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_duplicate_and_dotted_ids() {
        let mut config = FleetConfig::default();
        config.bots = vec![
            BotSpec::new("a", ["mine"]),
            BotSpec::new("a", ["fish"]),
            BotSpec::new("b.c", Vec::<String>::new()),
        ];
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate bot id a")));
        assert!(errors.iter().any(|e| e.contains("invalid bot id")));
    }

    #[test]
    fn test_validate_rejects_heartbeat_slower_than_timeout() {
        let mut config = FleetConfig::default();
        config.bot.heartbeat_interval_ms = config.orchestrator.heartbeat_timeout_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_periods() {
        let mut config = FleetConfig::default();
        config.bot.heartbeat_interval_ms = 0;
        config.bank.check_interval_ms = 0;
        config.orchestrator.sweep_interval_ms = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("bot.heartbeat_interval_ms must be positive")));
        assert!(errors.iter().any(|e| e.contains("bank.check_interval_ms must be positive")));
        assert!(errors.iter().any(|e| e.contains("orchestrator.sweep_interval_ms must be positive")));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = FleetConfig::load_from("/nonexistent/botfleet-config").unwrap();
        assert_eq!(config.bank.lease_ceiling_ms, 30_000);
        assert!(config.bots.is_empty());
    }
}
