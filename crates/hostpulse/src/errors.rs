// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures raised by a counter provider or one of its handles.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The counter, instance or category no longer exists. Registrations
    /// reading this are evicted as stale.
    #[error("counter not found: {0}")]
    NotFound(String),

    /// The counter exists but could not be read right now.
    #[error("counter unavailable: {0}")]
    Unavailable(String),

    #[error("counter i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl CounterError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CounterError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory provider unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid instance pattern {pattern:?} for category {category}: {source}")]
    InvalidPattern {
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery worker is not running")]
    WorkerStopped,

    #[error("value {0} cannot be written to the line protocol")]
    NonFiniteValue(f64),
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("invalid filter configuration: {0}")]
    InvalidConfig(String),
}

/// Error returned by a capability (source, transform or sink) during a tick.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("{0}")]
    Other(String),
}
