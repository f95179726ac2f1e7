// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Capacity of the delivery spool when the sink config leaves it unset or zero.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 1000;

/// Fixed pause between TCP reconnect attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Refresh cadence for dynamic categories without an explicit interval.
pub const DEFAULT_CATEGORY_REFRESH_MS: u64 = 300_000;

/// Rebuild cadence of the site lookup directory.
pub const DEFAULT_DIRECTORY_REFRESH_MS: u64 = 300_000;

/// Nominal sampling interval stamped on events, in seconds.
pub const DEFAULT_INTERVAL_SECS: u32 = 10;

/// Instance prefix identifying worker processes for the identity-join filters.
pub const DEFAULT_WORKER_INSTANCE_PREFIX: &str = "w3wp";
