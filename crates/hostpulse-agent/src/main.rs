// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use hostpulse_agent::config::AgentConfig;
use hostpulse_agent::directory::ConfiguredDirectory;
use hostpulse_agent::error::AgentError;
use hostpulse_agent::services::{self, Providers};
use hostpulse_agent::{hostname, logger};
use hostpulse_procfs::ProcfsProvider;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("HOSTPULSE | ERROR | {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.level().and_then(logger::init) {
        eprintln!("HOSTPULSE | ERROR | {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let hostname = hostname::resolve(config.host.as_deref());
    let procfs = ProcfsProvider::new();
    let providers = Providers {
        counters: Arc::new(procfs.clone()),
        directory: Arc::new(ConfiguredDirectory::new(
            &config.transforms.site_enrichment.sites,
            procfs,
        )),
    };

    let handle = services::start(&config, &hostname, providers)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown requested");
    handle.stop().await
}
