// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wires the configured sources, transforms and sinks into a running pipeline.

use crate::config::AgentConfig;
use crate::error::AgentError;
use hostpulse::console::ConsoleSink;
use hostpulse::delivery::GraphiteSink;
use hostpulse::orchestrator::Orchestrator;
use hostpulse::provider::{CounterProvider, DirectoryProvider};
use hostpulse::registry::SourceRegistry;
use hostpulse::transform::TransformChain;
use hostpulse::Sink;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopping,
    Stopped,
}

/// Where counters and site data are read from.
pub struct Providers {
    pub counters: Arc<dyn CounterProvider>,
    pub directory: Arc<dyn DirectoryProvider>,
}

struct Running {
    ticks: CancellationToken,
    refreshes: CancellationToken,
    scheduler: JoinHandle<()>,
    refreshers: Vec<JoinHandle<()>>,
    graphite: Vec<Arc<GraphiteSink>>,
}

/// Handle to a started pipeline.
pub struct ServicesHandle {
    status: RwLock<ServiceStatus>,
    orchestrator: Arc<Orchestrator>,
    running: Mutex<Option<Running>>,
}

impl ServicesHandle {
    pub async fn status(&self) -> ServiceStatus {
        *self.status.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.status().await == ServiceStatus::Running
    }

    #[must_use]
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Stops ticking, waits for the pass in flight, stops the refresh timers
    /// and finally closes the sinks. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        *self.status.write().await = ServiceStatus::Stopping;
        info!("Stopping services");

        running.ticks.cancel();
        if let Err(e) = running.scheduler.await {
            error!("Pipeline scheduler ended abnormally: {e}");
        }

        running.refreshes.cancel();
        for refresher in running.refreshers {
            if let Err(e) = refresher.await {
                error!("Refresh task ended abnormally: {e}");
            }
        }

        for sink in &running.graphite {
            if sink.dropped() > 0 {
                warn!(sink = sink.name(), dropped = sink.dropped(), "Events were dropped");
            }
            sink.shutdown().await;
        }

        *self.status.write().await = ServiceStatus::Stopped;
        info!("Services stopped");
        Ok(())
    }
}

/// Builds the pipeline described by `config` and starts its timers. Must be
/// called from within a tokio runtime.
pub fn start(
    config: &AgentConfig,
    hostname: &str,
    providers: Providers,
) -> Result<ServicesHandle, AgentError> {
    let ticks = CancellationToken::new();
    let refreshes = CancellationToken::new();
    let mut orchestrator = Orchestrator::new();
    let mut refreshers = Vec::new();

    if config.sources.categories.is_empty() {
        warn!("No counter categories configured, nothing will be collected");
    }
    let registry = Arc::new(
        SourceRegistry::new(providers.counters, &config.sources.categories)?
            .with_server_name(hostname)
            .with_interval(config.interval_secs()),
    );
    refreshers.extend(registry.spawn_refresh_tasks(&refreshes));
    orchestrator.register_source(registry);

    let enrichment = &config.transforms.site_enrichment;
    if enrichment.enabled {
        let chain = Arc::new(TransformChain::new(
            &enrichment.chain_config(),
            providers.directory,
        )?);
        refreshers.push(chain.spawn_directory_refresh(&refreshes));
        orchestrator.register_transform(chain);
    }

    let mut graphite = Vec::new();
    for sink_config in &config.sinks.graphite {
        let sink = Arc::new(GraphiteSink::start(sink_config.clone()));
        orchestrator.register_sink(Arc::<GraphiteSink>::clone(&sink));
        graphite.push(sink);
    }
    if config.sinks.console.enabled {
        orchestrator.register_sink(Arc::new(ConsoleSink::stdout(config.sinks.console.pretty)));
    }

    let orchestrator = Arc::new(orchestrator);
    let scheduler = Arc::clone(&orchestrator).spawn(config.interval(), ticks.clone());

    info!(
        hostname,
        interval_ms = config.interval_ms,
        categories = config.sources.categories.len(),
        graphite_sinks = graphite.len(),
        "Services started"
    );

    Ok(ServicesHandle {
        status: RwLock::new(ServiceStatus::Running),
        orchestrator,
        running: Mutex::new(Some(Running {
            ticks,
            refreshes,
            scheduler,
            refreshers,
            graphite,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConsoleConfig, SinksConfig, SourcesConfig};
    use hostpulse::config::CategoryConfig;
    use hostpulse::orchestrator::TickOutcome;
    use hostpulse::provider::testing::{FakeCounterProvider, FakeDirectory};

    fn console_config(categories: Vec<CategoryConfig>) -> AgentConfig {
        AgentConfig {
            interval_ms: 60_000,
            sources: SourcesConfig { categories },
            sinks: SinksConfig {
                console: ConsoleConfig {
                    enabled: true,
                    pretty: false,
                },
                ..SinksConfig::default()
            },
            ..AgentConfig::default()
        }
    }

    fn providers(counters: &FakeCounterProvider) -> Providers {
        Providers {
            counters: Arc::new(counters.clone()),
            directory: Arc::new(FakeDirectory::new()),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let counters = FakeCounterProvider::new();
        counters.add_category("Memory", &[]);
        let config = console_config(vec![CategoryConfig {
            name: "Memory".to_string(),
            counters: vec!["Available Bytes".to_string()],
            ..CategoryConfig::default()
        }]);

        let handle = start(&config, "web01", providers(&counters)).expect("start failed");
        assert_eq!(handle.status().await, ServiceStatus::Running);

        handle.stop().await.expect("stop failed");
        assert_eq!(handle.status().await, ServiceStatus::Stopped);
        handle.stop().await.expect("second stop failed");
    }

    #[tokio::test]
    async fn test_manual_tick_runs_configured_pipeline() {
        let counters = FakeCounterProvider::new();
        counters.add_category("Memory", &[]);
        counters.set_value("Memory", "Available Bytes", "", 42.0);
        let config = AgentConfig {
            interval_ms: 30_000,
            ..console_config(vec![CategoryConfig {
                name: "Memory".to_string(),
                counters: vec!["Available Bytes".to_string()],
                ..CategoryConfig::default()
            }])
        };

        let handle = start(&config, "web01", providers(&counters)).expect("start failed");
        let TickOutcome::Completed(report) = handle.orchestrator().run_tick() else {
            panic!("tick was skipped");
        };

        assert_eq!(report.collected, 1);
        assert!(report.failures.is_empty());
        handle.stop().await.expect("stop failed");
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_start() {
        let config = console_config(vec![CategoryConfig {
            name: "Process".to_string(),
            counters: vec!["ID Process".to_string()],
            instance_match_pattern: Some("(".to_string()),
            ..CategoryConfig::default()
        }]);

        let result = start(&config, "web01", providers(&FakeCounterProvider::new()));

        assert!(matches!(result, Err(AgentError::Registry(_))));
    }
}
