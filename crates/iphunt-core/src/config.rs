//! Configuration types for the hunt engine
//!
//! The hunt payload arrives from the licensing gate as loosely shaped JSON.
//! It is parsed and validated here once, before any worker starts, so a
//! malformed account or range never surfaces mid-hunt.

use crate::matcher::AddressRange;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Main hunt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuntConfig {
    /// Accounts to hunt with
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,

    /// Target address ranges
    #[serde(default, alias = "subnets")]
    pub ranges: Vec<AddressRange>,

    /// Cloud network provider selection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Backoff and timeout schedule
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl HuntConfig {
    /// Create a configuration from accounts and ranges with default settings
    pub fn new(accounts: Vec<AccountConfig>, ranges: Vec<AddressRange>) -> Self {
        Self {
            accounts,
            ranges,
            provider: ProviderConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }

    /// Parse and validate a JSON payload
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let config: HuntConfig = serde_json::from_str(json)
            .map_err(|e| crate::Error::config(format!("Malformed hunt configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            crate::Error::config(format!(
                "Failed to read hunt configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Accounts with `enabled = true`
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.accounts.is_empty() {
            return Err(crate::Error::config("No accounts configured"));
        }

        if self.ranges.is_empty() {
            return Err(crate::Error::config("No target ranges configured"));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            account.validate()?;
            if !seen.insert(account.name.as_str()) {
                return Err(crate::Error::config(format!(
                    "Duplicate account name: {}",
                    account.name
                )));
            }
        }

        if self.enabled_accounts().next().is_none() {
            return Err(crate::Error::config("All configured accounts are disabled"));
        }

        self.provider.validate()?;
        self.backoff.validate()?;

        Ok(())
    }
}

/// One set of cloud credentials plus the resource to bind a capture to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account identity, unique within a hunt
    pub name: String,

    /// Provider credentials, passed through to the provider untouched
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    /// Identifier of the compute resource that receives the address
    #[serde(alias = "target", alias = "instance_id")]
    pub target_resource: String,

    /// Whether this account takes part in the hunt
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AccountConfig {
    /// Create a new enabled account
    pub fn new(name: impl Into<String>, target_resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credentials: BTreeMap::new(),
            target_resource: target_resource.into(),
            enabled: true,
        }
    }

    /// Add a credential field
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    /// Enable or disable the account
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("Account name cannot be empty"));
        }
        if self.target_resource.trim().is_empty() {
            return Err(crate::Error::config(format!(
                "Account {} has no target resource",
                self.name
            )));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

/// Cloud network provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// In-process simulated provider
    Simulated {
        /// Prefixes the simulated provider allocates from
        #[serde(default = "default_sim_pools")]
        pools: Vec<String>,
        /// Maximum addresses an account may hold at once
        #[serde(default = "default_sim_max_addresses")]
        max_addresses: usize,
        /// Artificial latency per call (milliseconds)
        #[serde(default)]
        latency_ms: u64,
        /// Probability in [0, 1] that a call fails with a transport error
        #[serde(default)]
        failure_rate: f64,
        /// Target resources that exist; empty means every target exists
        #[serde(default)]
        instances: Vec<String>,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Simulated {
                pools,
                max_addresses,
                failure_rate,
                ..
            } => {
                if pools.is_empty() {
                    return Err(crate::Error::config(
                        "Simulated provider needs at least one pool",
                    ));
                }
                if *max_addresses == 0 {
                    return Err(crate::Error::config(
                        "Simulated provider max_addresses must be > 0",
                    ));
                }
                if !(0.0..=1.0).contains(failure_rate) {
                    return Err(crate::Error::config(
                        "Simulated provider failure_rate must be within [0, 1]",
                    ));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Simulated { .. } => "simulated",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Simulated {
            pools: default_sim_pools(),
            max_addresses: default_sim_max_addresses(),
            latency_ms: 0,
            failure_rate: 0.0,
            instances: Vec::new(),
        }
    }
}

fn default_sim_pools() -> Vec<String> {
    vec!["198.51.100.0/24".to_string(), "203.0.113.0/24".to_string()]
}

fn default_sim_max_addresses() -> usize {
    5
}

/// Capture ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerConfig {
    /// JSON-lines file ledger
    File {
        /// Path to the ledger file
        path: String,
    },

    /// In-memory ledger (not persistent)
    #[default]
    Memory,

    /// Custom ledger
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl LedgerConfig {
    /// Get the ledger type name
    pub fn type_name(&self) -> &str {
        match self {
            LedgerConfig::File { .. } => "file",
            LedgerConfig::Memory => "memory",
            LedgerConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Backoff, timeout and observability settings for account workers
///
/// Retries are unbounded; these values only shape how fast the hunt
/// spins and when a worker is reported as stuck.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Cooldown after the provider reports a quota/throttling limit
    #[serde(default = "default_quota_cooldown_ms")]
    pub quota_cooldown_ms: u64,

    /// Cooldown after a transport failure or timeout
    #[serde(default = "default_transport_cooldown_ms")]
    pub transport_cooldown_ms: u64,

    /// Lower bound of the randomized pause after releasing a miss
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,

    /// Upper bound of the randomized pause after releasing a miss
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,

    /// Timeout applied to every provider call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// A worker without a successful allocation for this long is reported stuck
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,

    /// Capacity of the hunt event channel
    ///
    /// When full, events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl BackoffConfig {
    /// Validate the schedule
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.call_timeout_ms == 0 {
            return Err(crate::Error::config("call_timeout_ms must be > 0"));
        }
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(crate::Error::config(format!(
                "jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }

    pub fn quota_cooldown(&self) -> Duration {
        Duration::from_millis(self.quota_cooldown_ms)
    }

    pub fn transport_cooldown(&self) -> Duration {
        Duration::from_millis(self.transport_cooldown_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    /// Pick a pause in `[jitter_min_ms, jitter_max_ms]`
    pub fn jitter(&self) -> Duration {
        use rand::Rng;

        if self.jitter_max_ms <= self.jitter_min_ms {
            return Duration::from_millis(self.jitter_min_ms);
        }
        let ms = rand::thread_rng().gen_range(self.jitter_min_ms..=self.jitter_max_ms);
        Duration::from_millis(ms)
    }

    /// Longest single sleep a worker can take
    pub fn max_single_backoff(&self) -> Duration {
        Duration::from_millis(
            self.quota_cooldown_ms
                .max(self.transport_cooldown_ms)
                .max(self.jitter_max_ms),
        )
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            quota_cooldown_ms: default_quota_cooldown_ms(),
            transport_cooldown_ms: default_transport_cooldown_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            stuck_after_secs: default_stuck_after_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_quota_cooldown_ms() -> u64 {
    10_000
}

fn default_transport_cooldown_ms() -> u64 {
    2_000
}

fn default_jitter_min_ms() -> u64 {
    300
}

fn default_jitter_max_ms() -> u64 {
    1_500
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_stuck_after_secs() -> u64 {
    900
}

fn default_event_channel_capacity() -> usize {
    1000
}
