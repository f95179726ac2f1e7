// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The sample value shared by every pipeline stage.

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// One counter sample.
///
/// Events are values: once a batch leaves the registry, stages that want to
/// change an event build a new one (see [`MetricEvent::enriched`]) instead of
/// editing a shared instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricEvent {
    /// Logical grouping of the counter, e.g. `Processor`.
    pub category: String,
    /// Counter name within the category.
    #[serde(rename = "type")]
    pub counter: String,
    /// Instance the counter is measured against; empty for singleton counters.
    pub instance: String,
    /// Instantaneous sample value.
    pub value: f64,
    /// Sample time in seconds since the unix epoch, shared by a whole pass.
    pub timestamp: i64,
    /// Nominal sampling interval in seconds.
    pub interval: u32,
    /// Site label set by enrichment.
    pub site: Option<String>,
    /// Host label.
    pub server_name: Option<String>,
}

impl MetricEvent {
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        counter: impl Into<String>,
        instance: impl Into<String>,
        value: f64,
        timestamp: i64,
        interval: u32,
    ) -> Self {
        Self {
            category: category.into(),
            counter: counter.into(),
            instance: instance.into(),
            value,
            timestamp,
            interval,
            site: None,
            server_name: None,
        }
    }

    /// Returns a copy labelled with `site` and with its instance replaced.
    #[must_use]
    pub fn enriched(&self, site: &str, instance: &str) -> Self {
        Self {
            site: Some(site.to_string()),
            instance: instance.to_string(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_server_name(self, server_name: Option<&str>) -> Self {
        Self {
            server_name: server_name.map(str::to_string),
            ..self
        }
    }

    /// Whether this event is `category`/`counter`, compared case-insensitively.
    #[must_use]
    pub fn is(&self, category: &str, counter: &str) -> bool {
        self.category.eq_ignore_ascii_case(category) && self.counter.eq_ignore_ascii_case(counter)
    }
}

impl fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{site: {:?}, category: {}, type: {}, instance: {}, value: {}, timestamp: {}, interval: {}}}",
            self.site.as_deref().unwrap_or_default(),
            self.category,
            self.counter,
            self.instance,
            self.value,
            self.timestamp,
            self.interval
        )
    }
}

/// Current time in whole seconds since the unix epoch.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
