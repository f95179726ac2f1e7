// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capability contracts registered with the orchestrator.
//!
//! Every plugin is constructed by the caller and registered explicitly; the
//! orchestrator only knows these three roles.

use crate::errors::PipelineError;
use crate::event::MetricEvent;

/// Produces a batch of samples once per tick. Must not block indefinitely.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn collect(&self) -> Result<Vec<MetricEvent>, PipelineError>;
}

/// Turns one batch into another. Implementations may keep private caches but
/// must not retain the batch.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, batch: Vec<MetricEvent>) -> Result<Vec<MetricEvent>, PipelineError>;
}

/// Consumes the final batch of a tick. Fire-and-forget from the caller's side.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver(&self, batch: &[MetricEvent]) -> Result<(), PipelineError>;
}
