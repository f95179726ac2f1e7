// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::{SiteEnrichmentConfig, TargetConfig};
use crate::errors::{PipelineError, TransformError};
use crate::event::MetricEvent;
use crate::pipeline::Transform;
use crate::provider::DirectoryProvider;
use crate::transform::directory::SiteDirectory;
use crate::transform::filters::{self, CategoryFilter, FilterContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct ChainState {
    directory: SiteDirectory,
    filters: Vec<Box<dyn CategoryFilter>>,
}

/// Applies the configured filters to their target categories, in order.
///
/// Filter execution and directory replacement share one lock, so a pass
/// always sees one complete directory.
pub struct TransformChain {
    targets: Vec<TargetConfig>,
    debug: bool,
    refresh_interval: Duration,
    provider: Arc<dyn DirectoryProvider>,
    state: Mutex<ChainState>,
}

impl TransformChain {
    /// Builds one filter per distinct name used by the targets and loads the
    /// directory once. Unknown filter names are reported here and skipped
    /// afterwards.
    pub fn new(
        config: &SiteEnrichmentConfig,
        provider: Arc<dyn DirectoryProvider>,
    ) -> Result<Self, TransformError> {
        let mut seen = HashSet::new();
        let mut built = Vec::new();
        for name in config.targets.iter().flat_map(|t| t.filters.iter()) {
            if !seen.insert(name.as_str()) {
                continue;
            }
            match filters::build(name, &config.worker_instance_prefix)? {
                Some(filter) => built.push(filter),
                None => warn!(filter = name, "Unknown filter, it will be ignored"),
            }
        }

        let directory = match SiteDirectory::load(provider.as_ref()) {
            Ok(directory) => directory,
            Err(e) => {
                warn!("Failed to load site directory, starting empty: {e}");
                SiteDirectory::default()
            }
        };
        debug!(sites = directory.len(), filters = built.len(), "Transform chain ready");

        Ok(Self {
            targets: config.targets.clone(),
            debug: config.debug,
            refresh_interval: config.directory_refresh_interval(),
            provider,
            state: Mutex::new(ChainState {
                directory,
                filters: built,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs every target's filters over the batch.
    #[must_use]
    pub fn run(&self, mut batch: Vec<MetricEvent>) -> Vec<MetricEvent> {
        let mut state = self.lock();
        let ChainState { directory, filters } = &mut *state;
        let mut ctx = FilterContext::new(directory, self.provider.as_ref(), self.debug);

        for target in &self.targets {
            for name in &target.filters {
                if let Some(filter) = filters.iter_mut().find(|f| f.name() == name.as_str()) {
                    batch = filter.filter(batch, &target.category, target.preserve_original, &mut ctx);
                }
            }
        }
        batch
    }

    /// Reloads the directory. The new directory is built without holding the
    /// lock; on failure the current one stays in place.
    pub fn refresh_directory(&self) -> bool {
        match SiteDirectory::load(self.provider.as_ref()) {
            Ok(directory) => {
                let sites = directory.len();
                self.lock().directory = directory;
                debug!(sites, "Site directory refreshed");
                true
            }
            Err(e) => {
                error!("Failed to refresh site directory, keeping the previous one: {e}");
                false
            }
        }
    }

    #[must_use]
    pub fn directory(&self) -> SiteDirectory {
        self.lock().directory.clone()
    }

    pub fn spawn_directory_refresh(self: &Arc<Self>, cancel: &CancellationToken) -> JoinHandle<()> {
        let chain = Arc::clone(self);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = interval(chain.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // discard first tick, loaded at construction

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("Site directory refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let chain = Arc::clone(&chain);
                if let Err(e) = tokio::task::spawn_blocking(move || chain.refresh_directory()).await {
                    error!("Site directory refresh panicked: {e}");
                }
            }
        })
    }
}

impl Transform for TransformChain {
    fn name(&self) -> &str {
        "site_enrichment"
    }

    fn apply(&self, batch: Vec<MetricEvent>) -> Result<Vec<MetricEvent>, PipelineError> {
        Ok(self.run(batch))
    }
}
