// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hostpulse::errors::{RegistryError, TransformError};

/// Errors that stop the agent from starting.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Failed to load configuration: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to set up counter sources: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to set up transforms: {0}")]
    Transform(#[from] TransformError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}
