// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed configuration for the pipeline components.
//!
//! Every struct deserializes with `#[serde(default)]`, so partial documents are
//! accepted and missing keys fall back to the values below.

use crate::constants::{
    DEFAULT_CATEGORY_REFRESH_MS, DEFAULT_DIRECTORY_REFRESH_MS, DEFAULT_SEND_BUFFER_SIZE,
    DEFAULT_WORKER_INSTANCE_PREFIX,
};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::warn;

/// Transport used by a Graphite sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    Tcp,
    #[default]
    Udp,
}

impl Protocol {
    /// Parses a protocol name. Anything other than `tcp` or `udp` means `udp`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" | "" => Protocol::Udp,
            other => {
                warn!("Unrecognized sink protocol {other:?}, falling back to udp");
                Protocol::Udp
            }
        }
    }
}

impl<'de> Deserialize<'de> for Protocol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map_or(Protocol::Udp, Protocol::parse))
    }
}

/// One Graphite sink.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub hostname: String,
    pub port: u16,
    pub protocol: Protocol,
    /// First path segment, omitted when empty.
    pub prefix: String,
    /// Host segment of the path. Events carrying their own `server_name` are
    /// used when this is unset.
    pub server_name: Option<String>,
    /// Spool capacity; zero means the default.
    pub send_buffer_size: usize,
    /// Log every outgoing line.
    pub debug: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: 2003,
            protocol: Protocol::Udp,
            prefix: String::new(),
            server_name: None,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            debug: false,
        }
    }
}

impl SinkConfig {
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        if self.send_buffer_size == 0 {
            DEFAULT_SEND_BUFFER_SIZE
        } else {
            self.send_buffer_size
        }
    }
}

/// One counter category to sample.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub name: String,
    /// Re-resolve instances on a timer.
    pub dynamic: bool,
    pub dynamic_interval_ms: Option<u64>,
    pub counters: Vec<String>,
    /// Instances registered unconditionally. Empty means no fixed list.
    pub named_instances: Vec<String>,
    /// Regular expression matched against enumerated instance names.
    pub instance_match_pattern: Option<String>,
}

impl CategoryConfig {
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(
            self.dynamic_interval_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_CATEGORY_REFRESH_MS),
        )
    }
}

/// Applies `filters`, in order, to the events of `category`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub category: String,
    pub filters: Vec<String>,
    /// Append rewritten copies instead of replacing the originals.
    pub preserve_original: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteEnrichmentConfig {
    pub targets: Vec<TargetConfig>,
    /// Log the old and new event for every rewrite.
    pub debug: bool,
    pub directory_refresh_interval_ms: u64,
    pub worker_instance_prefix: String,
}

impl Default for SiteEnrichmentConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            debug: false,
            directory_refresh_interval_ms: DEFAULT_DIRECTORY_REFRESH_MS,
            worker_instance_prefix: DEFAULT_WORKER_INSTANCE_PREFIX.to_string(),
        }
    }
}

impl SiteEnrichmentConfig {
    #[must_use]
    pub fn directory_refresh_interval(&self) -> Duration {
        match self.directory_refresh_interval_ms {
            0 => Duration::from_millis(DEFAULT_DIRECTORY_REFRESH_MS),
            ms => Duration::from_millis(ms),
        }
    }
}
