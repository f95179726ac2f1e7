// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named filters that label events with the site they belong to.

use crate::constants::DEFAULT_WORKER_INSTANCE_PREFIX;
use crate::errors::TransformError;
use crate::event::MetricEvent;
use crate::provider::DirectoryProvider;
use crate::transform::directory::SiteDirectory;
use regex::Regex;
use std::collections::HashMap;
use tracing::{info, warn};

pub const WORKER_PROCESS: &str = "worker_process";
pub const WORKER_PROCESS_CLR: &str = "worker_process_clr";
pub const SITE_PATH_ID: &str = "site_path_id";
pub const APP_POOL_INSTANCE: &str = "app_pool_instance";

/// Shared, read-mostly state for one chain pass.
pub struct FilterContext<'a> {
    pub directory: &'a SiteDirectory,
    pub provider: &'a dyn DirectoryProvider,
    pub debug: bool,
    active: Option<HashMap<i64, String>>,
}

impl<'a> FilterContext<'a> {
    #[must_use]
    pub fn new(directory: &'a SiteDirectory, provider: &'a dyn DirectoryProvider, debug: bool) -> Self {
        Self {
            directory,
            provider,
            debug,
            active: None,
        }
    }

    /// Owner of a running process. Active processes are listed at most once
    /// per pass; a listing failure counts as no processes.
    pub fn owner_of(&mut self, pid: i64) -> Option<&str> {
        let provider = self.provider;
        let active = self.active.get_or_insert_with(|| match provider.enumerate_active_processes() {
            Ok(processes) => processes.into_iter().map(|p| (p.pid, p.owner)).collect(),
            Err(e) => {
                warn!("Failed to list active processes: {e}");
                HashMap::new()
            }
        });
        active.get(&pid).map(String::as_str)
    }
}

pub trait CategoryFilter: Send {
    fn name(&self) -> &'static str;

    /// Rewrites the events of `target` that this filter recognizes.
    fn filter(
        &mut self,
        batch: Vec<MetricEvent>,
        target: &str,
        preserve_original: bool,
        ctx: &mut FilterContext<'_>,
    ) -> Vec<MetricEvent>;
}

/// Builds the filter registered under `name`, if there is one.
pub fn build(name: &str, worker_prefix: &str) -> Result<Option<Box<dyn CategoryFilter>>, TransformError> {
    let filter: Box<dyn CategoryFilter> = match name {
        WORKER_PROCESS => Box::new(WorkerProcessFilter::process(worker_prefix)),
        WORKER_PROCESS_CLR => Box::new(WorkerProcessFilter::clr(worker_prefix)),
        SITE_PATH_ID => Box::new(SitePathFilter::new()?),
        APP_POOL_INSTANCE => Box::new(AppPoolFilter::new()?),
        _ => return Ok(None),
    };
    Ok(Some(filter))
}

/// Applies `rewrite` to every event of the batch.
///
/// With `preserve_original` the rewritten copies are appended after the
/// batch, otherwise each copy takes the place of its original.
pub(crate) fn rewrite_batch<F>(
    filter: &str,
    batch: Vec<MetricEvent>,
    preserve_original: bool,
    debug: bool,
    mut rewrite: F,
) -> Vec<MetricEvent>
where
    F: FnMut(&MetricEvent) -> Option<MetricEvent>,
{
    let mut output = Vec::with_capacity(batch.len());
    let mut appended = Vec::new();

    for event in batch {
        let Some(rewritten) = rewrite(&event) else {
            output.push(event);
            continue;
        };
        if debug {
            info!(filter, "Rewrote {event} as {rewritten}");
        }
        if preserve_original {
            output.push(event);
            appended.push(rewritten);
        } else {
            output.push(rewritten);
        }
    }

    output.extend(appended);
    output
}

fn in_target(event: &MetricEvent, target: &str) -> bool {
    event.category.eq_ignore_ascii_case(target)
}

/// Two-scan identity join: learns `instance -> pid` from an identity counter,
/// then labels worker instances with the name of the application owning that
/// pid.
///
/// The identity table lives as long as the filter and is never pruned, so a
/// worker seen without its identity counter is labelled once the counter has
/// been observed in any earlier pass.
pub struct WorkerProcessFilter {
    name: &'static str,
    identity_category: &'static str,
    identity_counter: &'static str,
    prefix: String,
    identities: HashMap<String, i64>,
}

impl WorkerProcessFilter {
    /// Joins on `Process` / `ID Process`.
    #[must_use]
    pub fn process(prefix: &str) -> Self {
        Self::new(WORKER_PROCESS, "Process", "ID Process", prefix)
    }

    /// Joins on `.NET CLR Memory` / `Process ID`.
    #[must_use]
    pub fn clr(prefix: &str) -> Self {
        Self::new(WORKER_PROCESS_CLR, ".NET CLR Memory", "Process ID", prefix)
    }

    fn new(
        name: &'static str,
        identity_category: &'static str,
        identity_counter: &'static str,
        prefix: &str,
    ) -> Self {
        let prefix = if prefix.is_empty() {
            DEFAULT_WORKER_INSTANCE_PREFIX
        } else {
            prefix
        };
        Self {
            name,
            identity_category,
            identity_counter,
            prefix: prefix.to_string(),
            identities: HashMap::new(),
        }
    }

    #[must_use]
    pub fn identity(&self, instance: &str) -> Option<i64> {
        self.identities.get(instance).copied()
    }
}

impl CategoryFilter for WorkerProcessFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    #[allow(clippy::cast_possible_truncation)]
    fn filter(
        &mut self,
        batch: Vec<MetricEvent>,
        target: &str,
        preserve_original: bool,
        ctx: &mut FilterContext<'_>,
    ) -> Vec<MetricEvent> {
        for event in &batch {
            if event.is(self.identity_category, self.identity_counter) && event.value.is_finite() {
                self.identities
                    .insert(event.instance.clone(), event.value as i64);
            }
        }

        let identities = &self.identities;
        let (category, counter) = (self.identity_category, self.identity_counter);
        let prefix = self.prefix.as_str();
        let debug = ctx.debug;

        rewrite_batch(self.name, batch, preserve_original, debug, |event| {
            if !in_target(event, target)
                || event.is(category, counter)
                || !event.instance.starts_with(prefix)
            {
                return None;
            }
            let pid = identities.get(&event.instance)?;
            let owner = ctx.owner_of(*pid)?;
            Some(event.enriched(owner, ""))
        })
    }
}

/// Labels instances embedding a site id (`..._LM_W3SVC_<id>_...`) with the
/// site's name from the directory.
pub struct SitePathFilter {
    pattern: Regex,
}

impl SitePathFilter {
    pub fn new() -> Result<Self, TransformError> {
        let pattern = Regex::new(r"_LM_W3SVC_(\d+)_")
            .map_err(|e| TransformError::InvalidConfig(e.to_string()))?;
        Ok(Self { pattern })
    }
}

impl CategoryFilter for SitePathFilter {
    fn name(&self) -> &'static str {
        SITE_PATH_ID
    }

    fn filter(
        &mut self,
        batch: Vec<MetricEvent>,
        target: &str,
        preserve_original: bool,
        ctx: &mut FilterContext<'_>,
    ) -> Vec<MetricEvent> {
        let directory = ctx.directory;
        rewrite_batch(SITE_PATH_ID, batch, preserve_original, ctx.debug, |event| {
            if !in_target(event, target) {
                return None;
            }
            let id = self
                .pattern
                .captures(&event.instance)?
                .get(1)?
                .as_str()
                .parse::<i64>()
                .ok()?;
            let name = directory.name(id)?;
            Some(event.enriched(name, name))
        })
    }
}

/// Labels `<digits>_<pool>` instances with the pool name.
pub struct AppPoolFilter {
    pattern: Regex,
}

impl AppPoolFilter {
    pub fn new() -> Result<Self, TransformError> {
        let pattern = Regex::new(r"^\d+_(?P<pool>.+)$")
            .map_err(|e| TransformError::InvalidConfig(e.to_string()))?;
        Ok(Self { pattern })
    }
}

impl CategoryFilter for AppPoolFilter {
    fn name(&self) -> &'static str {
        APP_POOL_INSTANCE
    }

    fn filter(
        &mut self,
        batch: Vec<MetricEvent>,
        target: &str,
        preserve_original: bool,
        ctx: &mut FilterContext<'_>,
    ) -> Vec<MetricEvent> {
        rewrite_batch(APP_POOL_INSTANCE, batch, preserve_original, ctx.debug, |event| {
            if !in_target(event, target) {
                return None;
            }
            let pool = self.pattern.captures(&event.instance)?.name("pool")?.as_str();
            Some(event.enriched(pool, pool))
        })
    }
}
