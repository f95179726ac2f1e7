// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Loaded from a YAML file (`hostpulse.yaml` in the working directory, or the
//! path in `HOSTPULSE_CONFIG`), then overridden by `HOSTPULSE_` environment
//! variables. Nested keys are separated by `__`, so
//! `HOSTPULSE_TRANSFORMS__SITE_ENRICHMENT__DEBUG=true` sets
//! `transforms.site_enrichment.debug`.
//!
//! ```yaml
//! interval_ms: 10000
//! log_level: info
//! sources:
//!   categories:
//!     - name: Process
//!       dynamic: true
//!       counters: ["ID Process", "Working Set"]
//!       instance_match_pattern: "^php-fpm"
//! sinks:
//!   graphite:
//!     - hostname: graphite.internal
//!       port: 2003
//!       protocol: tcp
//!       prefix: hosts
//! ```

use crate::error::AgentError;
use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use hostpulse::config::{CategoryConfig, SinkConfig, SiteEnrichmentConfig, TargetConfig};
use hostpulse::constants::{DEFAULT_DIRECTORY_REFRESH_MS, DEFAULT_WORKER_INSTANCE_PREFIX};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "HOSTPULSE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "hostpulse.yaml";
const ENV_PREFIX: &str = "HOSTPULSE_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("invalid log level: {s:?}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub categories: Vec<CategoryConfig>,
}

/// A site the directory reports, configured by hand.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteEntry {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteEnrichmentSection {
    pub enabled: bool,
    pub debug: bool,
    pub directory_refresh_interval_ms: u64,
    pub worker_instance_prefix: String,
    pub sites: Vec<SiteEntry>,
    pub targets: Vec<TargetConfig>,
}

impl Default for SiteEnrichmentSection {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            directory_refresh_interval_ms: DEFAULT_DIRECTORY_REFRESH_MS,
            worker_instance_prefix: DEFAULT_WORKER_INSTANCE_PREFIX.to_string(),
            sites: Vec::new(),
            targets: Vec::new(),
        }
    }
}

impl SiteEnrichmentSection {
    #[must_use]
    pub fn chain_config(&self) -> SiteEnrichmentConfig {
        SiteEnrichmentConfig {
            targets: self.targets.clone(),
            debug: self.debug,
            directory_refresh_interval_ms: self.directory_refresh_interval_ms,
            worker_instance_prefix: self.worker_instance_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TransformsConfig {
    pub site_enrichment: SiteEnrichmentSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub pretty: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SinksConfig {
    pub graphite: Vec<SinkConfig>,
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Pipeline tick period.
    pub interval_ms: u64,
    /// Host name override.
    pub host: Option<String>,
    pub log_level: String,
    pub sources: SourcesConfig,
    pub transforms: TransformsConfig,
    pub sinks: SinksConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            host: None,
            log_level: LogLevel::default().to_string(),
            sources: SourcesConfig::default(),
            transforms: TransformsConfig::default(),
            sinks: SinksConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads from the file named by `HOSTPULSE_CONFIG`, or `hostpulse.yaml`.
    pub fn load() -> Result<Self, AgentError> {
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Loads from `path` and the environment. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, AgentError> {
        let config: AgentConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.interval_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "interval_ms must be greater than 0".to_string(),
            ));
        }
        self.level()?;

        for sink in &self.sinks.graphite {
            if sink.hostname.trim().is_empty() {
                return Err(AgentError::InvalidConfig(
                    "graphite sink hostname cannot be empty".to_string(),
                ));
            }
            if sink.port == 0 {
                return Err(AgentError::InvalidConfig(format!(
                    "graphite sink {} has no port",
                    sink.hostname
                )));
            }
        }

        if self.sinks.graphite.is_empty() && !self.sinks.console.enabled {
            return Err(AgentError::InvalidConfig("no sink configured".to_string()));
        }
        Ok(())
    }

    pub fn level(&self) -> Result<LogLevel, AgentError> {
        self.log_level.parse().map_err(AgentError::InvalidConfig)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Interval stamped on events, in whole seconds and at least one.
    #[must_use]
    pub fn interval_secs(&self) -> u32 {
        u32::try_from(self.interval_ms / 1000).unwrap_or(u32::MAX).max(1)
    }
}
