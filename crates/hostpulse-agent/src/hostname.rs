// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use tracing::warn;

pub const HOSTNAME_ENV: &str = "HOSTPULSE_HOSTNAME";

/// Name of this host, used as the server segment of metric paths.
///
/// Tried in order: `HOSTPULSE_HOSTNAME`, the configured `host`, `HOSTNAME`,
/// then the kernel host name. Falls back to `unknown`.
#[must_use]
pub fn resolve(configured: Option<&str>) -> String {
    if let Some(hostname) = env::var(HOSTNAME_ENV).ok().filter(|h| !h.is_empty()) {
        return hostname;
    }
    if let Some(hostname) = configured.filter(|h| !h.is_empty()) {
        return hostname.to_string();
    }
    if let Some(hostname) = env::var("HOSTNAME").ok().filter(|h| !h.is_empty()) {
        return hostname;
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("Failed to get system hostname: {e}"),
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}
