// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Graphite plaintext rendering.

use crate::errors::DeliveryError;
use crate::event::MetricEvent;

/// Replaces each whitespace run and each `.`, `/`, `(` or `)` with `_`.
///
/// # Examples
///
/// ```
/// use hostpulse::delivery::path::sanitize;
///
/// assert_eq!(sanitize("% Processor Time"), "%_Processor_Time");
/// assert_eq!(sanitize("ASP.NET Apps (x86)"), "ASP_NET_Apps__x86_");
/// ```
#[must_use]
pub fn sanitize(segment: &str) -> String {
    let mut sanitized = String::with_capacity(segment.len());
    let mut in_whitespace = false;
    for c in segment.chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                sanitized.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        match c {
            '.' | '/' | '(' | ')' => sanitized.push('_'),
            _ => sanitized.push(c),
        }
    }
    sanitized
}

/// Builds the dotted metric path of an event.
///
/// Segments, in order and skipped when empty: `prefix`, `site` or `server`,
/// the site, `server_name`, the category, the instance and the counter. An
/// empty instance is written as `_total`; an instance equal to the site is
/// left out.
#[must_use]
pub fn build_path(prefix: &str, server_name: &str, event: &MetricEvent) -> String {
    let site = sanitize(event.site.as_deref().unwrap_or_default());
    let category = sanitize(&event.category);
    let counter = sanitize(&event.counter);
    let instance = if event.instance.is_empty() {
        "_total".to_string()
    } else {
        let instance = sanitize(&event.instance);
        // unicode case folding, so `Ärzte` and `ÄRZTE` name the same site
        if instance.to_lowercase() == site.to_lowercase() {
            String::new()
        } else {
            instance
        }
    };
    let scope = if site.is_empty() { "server" } else { "site" };

    [
        prefix,
        scope,
        site.as_str(),
        server_name,
        category.as_str(),
        instance.as_str(),
        counter.as_str(),
    ]
    .iter()
    .filter(|segment| !segment.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(".")
    .to_lowercase()
}

/// Renders events as `"<path> <value> <unix-seconds>\n"` lines.
#[derive(Debug, Clone, Default)]
pub struct LineFormat {
    prefix: String,
    server_name: Option<String>,
}

impl LineFormat {
    #[must_use]
    pub fn new(prefix: impl Into<String>, server_name: Option<String>) -> Self {
        Self {
            prefix: prefix.into(),
            server_name: server_name.filter(|name| !name.is_empty()),
        }
    }

    /// Fails on NaN and infinities, which the protocol cannot carry.
    pub fn format(&self, event: &MetricEvent) -> Result<String, DeliveryError> {
        if !event.value.is_finite() {
            return Err(DeliveryError::NonFiniteValue(event.value));
        }
        let server_name = self
            .server_name
            .as_deref()
            .or(event.server_name.as_deref())
            .unwrap_or_default();
        let path = build_path(&self.prefix, server_name, event);
        Ok(format!("{path} {} {}\n", event.value, event.timestamp))
    }
}
