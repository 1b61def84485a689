//! Licensing gate plumbing
//!
//! Turns a [`LicenseGate`] into a validated [`HuntConfig`], with an explicit
//! two-tier source: the live payload from the gate, or the last-known-good
//! copy cached on disk when the gate cannot be reached. Which tier was used
//! is reported as [`Freshness`] so status output can show it.
//!
//! ## Decision Table
//!
//! | access check        | config fetch        | result                              |
//! |---------------------|---------------------|-------------------------------------|
//! | denied              | -                   | `AccessDenied`, hunt must not start |
//! | unavailable         | -                   | continue only if offline allowed    |
//! | granted / offline   | ok                  | `Live`, cache refreshed             |
//! | granted / offline   | unavailable         | `Cached` if offline allowed         |
//! | granted / offline   | denied / malformed  | error, cache not consulted          |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::HuntConfig;
use crate::error::{Error, Result};
use crate::traits::LicenseGate;

/// Where the hunt configuration came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched from the licensing gate just now
    Live { fetched_at: DateTime<Utc> },
    /// Last-known-good copy, the gate was unreachable
    Cached { cached_at: DateTime<Utc> },
}

impl Freshness {
    pub fn is_live(&self) -> bool {
        matches!(self, Freshness::Live { .. })
    }
}

/// What to do when the licensing gate cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
    /// Proceed with the cached configuration
    #[default]
    AllowCached,
    /// Refuse to start
    Deny,
}

/// A configuration together with its provenance
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HuntConfig,
    pub freshness: Freshness,
}

/// On-disk last-known-good configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    cached_at: DateTime<Utc>,
    config: HuntConfig,
}

/// Last-known-good configuration cache
#[derive(Debug, Clone)]
pub struct ConfigCache {
    path: PathBuf,
}

impl ConfigCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `config` as the last-known-good copy
    ///
    /// Written to a temporary file first, then renamed into place.
    pub async fn store(&self, config: &HuntConfig) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await?;
        }

        let file = CacheFile {
            cached_at: Utc::now(),
            config: config.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        fs::write(&temp, json).await?;
        fs::rename(&temp, &self.path).await?;

        debug!("Cached hunt configuration at {}", self.path.display());
        Ok(())
    }

    /// Load the cached copy, validated
    pub async fn load(&self) -> Result<(HuntConfig, DateTime<Utc>)> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::config(format!(
                "No cached configuration at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let file: CacheFile = serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Cached configuration {} is corrupted: {}",
                self.path.display(),
                e
            ))
        })?;
        file.config.validate()?;

        Ok((file.config, file.cached_at))
    }
}

/// Loads the hunt configuration through a gate, falling back to a cache
pub struct ConfigLoader<G> {
    gate: G,
    cache: Option<ConfigCache>,
    policy: OfflinePolicy,
}

impl<G: LicenseGate> ConfigLoader<G> {
    pub fn new(gate: G) -> Self {
        Self {
            gate,
            cache: None,
            policy: OfflinePolicy::default(),
        }
    }

    /// Keep a last-known-good copy at `cache`
    pub fn with_cache(mut self, cache: ConfigCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: OfflinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check access, then fetch and validate the configuration
    pub async fn load(&self) -> Result<LoadedConfig> {
        match self.gate.verify_access().await {
            Ok(true) => {
                debug!("{} granted access", self.gate.gate_name());
            }
            Ok(false) => {
                return Err(Error::access_denied(format!(
                    "{} refused access",
                    self.gate.gate_name()
                )));
            }
            Err(Error::Unavailable(reason)) if self.policy == OfflinePolicy::AllowCached => {
                warn!(
                    "{} unreachable ({}), continuing in offline mode",
                    self.gate.gate_name(),
                    reason
                );
            }
            Err(e) => return Err(e),
        }

        match self.gate.fetch_config().await {
            Ok(config) => {
                config.validate()?;
                if let Some(cache) = &self.cache
                    && let Err(e) = cache.store(&config).await
                {
                    warn!("Failed to cache hunt configuration: {}", e);
                }
                info!(
                    "Loaded live configuration: {} account(s), {} range(s)",
                    config.accounts.len(),
                    config.ranges.len()
                );
                Ok(LoadedConfig {
                    config,
                    freshness: Freshness::Live {
                        fetched_at: Utc::now(),
                    },
                })
            }
            Err(Error::Unavailable(reason)) => self.fall_back(reason).await,
            Err(e) => Err(e),
        }
    }

    async fn fall_back(&self, reason: String) -> Result<LoadedConfig> {
        if self.policy == OfflinePolicy::Deny {
            return Err(Error::unavailable(format!(
                "{} unreachable and offline mode is disabled: {}",
                self.gate.gate_name(),
                reason
            )));
        }

        let cache = self.cache.as_ref().ok_or_else(|| {
            Error::unavailable(format!(
                "{} unreachable and no configuration cache is set: {}",
                self.gate.gate_name(),
                reason
            ))
        })?;

        let (config, cached_at) = cache.load().await?;
        warn!(
            "{} unreachable ({}), using configuration cached at {}",
            self.gate.gate_name(),
            reason,
            cached_at
        );
        Ok(LoadedConfig {
            config,
            freshness: Freshness::Cached { cached_at },
        })
    }
}

/// A gate backed by a local JSON file
///
/// Always grants access. A missing or unreadable file is reported as
/// `Unavailable`, so the loader falls back to its cache.
#[derive(Debug, Clone)]
pub struct LocalFileGate {
    path: PathBuf,
}

impl LocalFileGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LicenseGate for LocalFileGate {
    async fn verify_access(&self) -> Result<bool> {
        Ok(true)
    }

    async fn fetch_config(&self) -> Result<HuntConfig> {
        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::unavailable(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        HuntConfig::from_json_str(&content)
    }

    fn gate_name(&self) -> &'static str {
        "local-file"
    }
}
