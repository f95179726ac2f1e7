// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter registration, discovery and sampling.
//!
//! Each configured category owns its registrations behind one lock shared by
//! mutation and sampling. Registrations are added by [`SourceRegistry::refresh`]
//! and only ever removed when a read reports the counter gone.

use crate::config::CategoryConfig;
use crate::constants::DEFAULT_INTERVAL_SECS;
use crate::errors::{PipelineError, RegistryError};
use crate::event::{unix_now, MetricEvent};
use crate::pipeline::Source;
use crate::provider::{CounterHandle, CounterProvider};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Identifies a registration within its category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationKey {
    pub counter: String,
    pub instance: String,
}

impl RegistrationKey {
    #[must_use]
    pub fn new(counter: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            counter: counter.into(),
            instance: instance.into(),
        }
    }
}

type Registrations = BTreeMap<RegistrationKey, Box<dyn CounterHandle>>;

struct Category {
    config: CategoryConfig,
    matcher: Option<Regex>,
    registrations: Mutex<Registrations>,
}

impl Category {
    fn new(config: CategoryConfig) -> Result<Self, RegistryError> {
        let matcher = config
            .instance_match_pattern
            .as_deref()
            .filter(|pattern| !pattern.is_empty())
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| RegistryError::InvalidPattern {
                    category: config.name.clone(),
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()?;

        Ok(Self {
            config,
            matcher,
            registrations: Mutex::new(BTreeMap::new()),
        })
    }

    /// A handle that panicked mid-pass leaves the map intact, so a poisoned
    /// lock is taken over rather than propagated.
    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct SourceRegistry {
    provider: Arc<dyn CounterProvider>,
    categories: Vec<Category>,
    server_name: Option<String>,
    interval: u32,
}

impl SourceRegistry {
    /// Builds the registry and resolves every category once.
    ///
    /// Categories the provider does not currently expose are kept, with a
    /// warning, because dynamic ones may appear later.
    pub fn new(
        provider: Arc<dyn CounterProvider>,
        categories: &[CategoryConfig],
    ) -> Result<Self, RegistryError> {
        let categories = categories
            .iter()
            .cloned()
            .map(Category::new)
            .collect::<Result<Vec<_>, _>>()?;

        match provider.enumerate_categories() {
            Ok(available) => {
                for category in &categories {
                    if !available
                        .iter()
                        .any(|name| name.eq_ignore_ascii_case(&category.config.name))
                    {
                        warn!(
                            category = category.config.name,
                            "Category is not exposed by the counter provider"
                        );
                    }
                }
            }
            Err(e) => warn!("Failed to enumerate counter categories: {e}"),
        }

        let registry = Self {
            provider,
            categories,
            server_name: None,
            interval: DEFAULT_INTERVAL_SECS,
        };
        for category in &registry.categories {
            registry.refresh_category(category);
        }
        Ok(registry)
    }

    /// Host label stamped on every produced event.
    #[must_use]
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Nominal interval, in seconds, stamped on every produced event.
    #[must_use]
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    fn category(&self, name: &str) -> Result<&Category, RegistryError> {
        self.categories
            .iter()
            .find(|c| c.config.name == name)
            .ok_or_else(|| RegistryError::UnknownCategory(name.to_string()))
    }

    /// Registers one counter instance. Returns whether a new registration was
    /// created; an existing key, a rejected instance or an open failure all
    /// leave the category unchanged.
    pub fn register_source(
        &self,
        category: &str,
        counter: &str,
        instance: &str,
        matcher: Option<&Regex>,
    ) -> Result<bool, RegistryError> {
        let category = self.category(category)?;
        let mut registrations = category.lock();
        Ok(self.register_locked(
            &category.config.name,
            &mut registrations,
            counter,
            instance,
            matcher,
        ))
    }

    fn register_locked(
        &self,
        category: &str,
        registrations: &mut Registrations,
        counter: &str,
        instance: &str,
        matcher: Option<&Regex>,
    ) -> bool {
        if matcher.is_some_and(|m| !m.is_match(instance)) {
            return false;
        }
        let key = RegistrationKey::new(counter, instance);
        if registrations.contains_key(&key) {
            return false;
        }

        let mut handle = match self.provider.open_counter(category, counter, instance) {
            Ok(handle) => handle,
            Err(e) => {
                error!(category, counter, instance, "Failed to open counter: {e}");
                return false;
            }
        };
        // rate counters need a baseline before their first meaningful read
        if let Err(e) = handle.read_next() {
            debug!(category, counter, instance, "Priming read failed: {e}");
        }

        debug!(category, counter, instance, "Registered counter");
        registrations.insert(key, handle);
        true
    }

    /// Removes a registration. Returns whether one was removed.
    pub fn unregister_source(
        &self,
        category: &str,
        key: &RegistrationKey,
    ) -> Result<bool, RegistryError> {
        let category = self.category(category)?;
        let removed = category.lock().remove(key).is_some();
        if removed {
            debug!(
                category = category.config.name,
                counter = key.counter,
                instance = key.instance,
                "Unregistered counter"
            );
        }
        Ok(removed)
    }

    /// Registers any instance the category now exposes. Never removes.
    /// Returns the number of new registrations.
    pub fn refresh(&self, category: &str) -> Result<usize, RegistryError> {
        let category = self.category(category)?;
        Ok(self.refresh_category(category))
    }

    fn refresh_category(&self, category: &Category) -> usize {
        let config = &category.config;
        let named = &config.named_instances;
        let needs_enumeration = category.matcher.is_some() || named.is_empty();

        // a failed enumeration only skips the enumeration rules, named
        // instances are registered regardless
        let enumerated = if needs_enumeration {
            match self.provider.enumerate_instances(&config.name) {
                Ok(instances) => Some(instances),
                Err(e) => {
                    warn!(
                        category = config.name,
                        "Failed to enumerate instances, keeping current registrations: {e}"
                    );
                    None
                }
            }
        } else {
            Some(Vec::new())
        };

        let mut registrations = category.lock();
        let mut added = 0;
        for counter in &config.counters {
            for instance in named {
                added += usize::from(self.register_locked(
                    &config.name,
                    &mut registrations,
                    counter,
                    instance,
                    None,
                ));
            }

            let Some(enumerated) = enumerated.as_ref() else {
                continue;
            };
            if let Some(matcher) = category.matcher.as_ref() {
                for instance in enumerated {
                    added += usize::from(self.register_locked(
                        &config.name,
                        &mut registrations,
                        counter,
                        instance,
                        Some(matcher),
                    ));
                }
            } else if named.is_empty() {
                if enumerated.is_empty() {
                    added += usize::from(self.register_locked(
                        &config.name,
                        &mut registrations,
                        counter,
                        "",
                        None,
                    ));
                } else {
                    for instance in enumerated {
                        added += usize::from(self.register_locked(
                            &config.name,
                            &mut registrations,
                            counter,
                            instance,
                            None,
                        ));
                    }
                }
            }
        }

        if added > 0 {
            info!(
                category = config.name,
                added,
                total = registrations.len(),
                "Category refreshed"
            );
        }
        added
    }

    /// Reads every registration once. All events share one timestamp.
    ///
    /// Registrations reporting their counter gone are removed after their
    /// category has been fully read, so they are missing from the next pass.
    #[must_use]
    pub fn sample_pass(&self) -> Vec<MetricEvent> {
        let timestamp = unix_now();
        let mut events = Vec::new();

        for category in &self.categories {
            let name = &category.config.name;
            let mut registrations = category.lock();
            let mut stale = Vec::new();

            for (key, handle) in registrations.iter_mut() {
                match handle.read_next() {
                    Ok(value) => events.push(
                        MetricEvent::new(
                            name.as_str(),
                            key.counter.as_str(),
                            key.instance.as_str(),
                            value,
                            timestamp,
                            self.interval,
                        )
                        .with_server_name(self.server_name.as_deref()),
                    ),
                    Err(e) if e.is_not_found() => {
                        info!(
                            category = name,
                            counter = key.counter,
                            instance = key.instance,
                            "Counter no longer exists, removing: {e}"
                        );
                        stale.push(key.clone());
                    }
                    Err(e) => warn!(
                        category = name,
                        counter = key.counter,
                        instance = key.instance,
                        "Failed to read counter: {e}"
                    ),
                }
            }

            for key in stale {
                registrations.remove(&key);
            }
        }

        events
    }

    /// Registered keys of a category, in key order.
    pub fn registrations(&self, category: &str) -> Result<Vec<RegistrationKey>, RegistryError> {
        Ok(self.category(category)?.lock().keys().cloned().collect())
    }

    /// Starts one refresh task per dynamic category.
    pub fn spawn_refresh_tasks(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.categories
            .iter()
            .filter(|c| c.config.dynamic)
            .map(|c| {
                let registry = Arc::clone(self);
                let name = c.config.name.clone();
                let period = c.config.refresh_interval();
                let cancel = cancel.clone();
                tokio::spawn(async move { registry.refresh_loop(name, period, cancel).await })
            })
            .collect()
    }

    async fn refresh_loop(self: Arc<Self>, category: String, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // discard first tick, the category was resolved at construction

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(category, "Refresh task stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let registry = Arc::clone(&self);
            let name = category.clone();
            match tokio::task::spawn_blocking(move || registry.refresh(&name)).await {
                Ok(Ok(added)) => debug!(category, added, "Dynamic refresh complete"),
                Ok(Err(e)) => error!(category, "Dynamic refresh failed: {e}"),
                Err(e) => error!(category, "Dynamic refresh task panicked: {e}"),
            }
        }
    }
}

impl Source for SourceRegistry {
    fn name(&self) -> &str {
        "counters"
    }

    fn collect(&self) -> Result<Vec<MetricEvent>, PipelineError> {
        Ok(self.sample_pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CounterError;
    use crate::provider::testing::FakeCounterProvider;
    use tracing_test::traced_test;

    fn category(name: &str, counters: &[&str]) -> CategoryConfig {
        CategoryConfig {
            name: name.to_string(),
            counters: counters.iter().map(|c| (*c).to_string()).collect(),
            ..CategoryConfig::default()
        }
    }

    fn registry(provider: &FakeCounterProvider, categories: &[CategoryConfig]) -> SourceRegistry {
        SourceRegistry::new(Arc::new(provider.clone()), categories).expect("failed to build registry")
    }

    fn keys(registry: &SourceRegistry, category: &str) -> Vec<(String, String)> {
        registry
            .registrations(category)
            .expect("unknown category")
            .into_iter()
            .map(|k| (k.counter, k.instance))
            .collect()
    }

    #[test]
    fn test_pattern_selects_matching_instances() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Disk", &["C:", "D:"]);
        let mut disk = category("Disk", &["Free Space"]);
        disk.instance_match_pattern = Some("^C:".to_string());

        let registry = registry(&provider, &[disk]);

        assert_eq!(
            keys(&registry, "Disk"),
            vec![("Free Space".to_string(), "C:".to_string())]
        );
    }

    #[test]
    fn test_named_instances_and_pattern_combine() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp", "w3wp#1", "sqlservr"]);
        let mut process = category("Process", &["Working Set"]);
        process.named_instances = vec!["_Total".to_string()];
        process.instance_match_pattern = Some("^w3wp".to_string());

        let registry = registry(&provider, &[process]);

        let instances: Vec<String> = keys(&registry, "Process").into_iter().map(|k| k.1).collect();
        assert_eq!(instances, vec!["_Total", "w3wp", "w3wp#1"]);
    }

    #[test]
    fn test_named_instances_skip_enumeration_rules() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp", "sqlservr"]);
        let mut process = category("Process", &["Thread Count"]);
        process.named_instances = vec!["sqlservr".to_string()];

        let registry = registry(&provider, &[process]);

        assert_eq!(
            keys(&registry, "Process"),
            vec![("Thread Count".to_string(), "sqlservr".to_string())]
        );
    }

    #[test]
    fn test_singleton_and_all_instances() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        provider.add_category("Processor", &["_Total", "0", "1"]);

        let registry = registry(
            &provider,
            &[
                category("Memory", &["Available Bytes", "Cached Bytes"]),
                category("Processor", &["% Processor Time"]),
            ],
        );

        assert_eq!(
            keys(&registry, "Memory"),
            vec![
                ("Available Bytes".to_string(), String::new()),
                ("Cached Bytes".to_string(), String::new()),
            ]
        );
        assert_eq!(keys(&registry, "Processor").len(), 3);
    }

    #[test]
    fn test_pattern_with_no_instances_registers_nothing() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Disk", &[]);
        let mut disk = category("Disk", &["Free Space"]);
        disk.instance_match_pattern = Some("^C:".to_string());

        let registry = registry(&provider, &[disk]);

        assert!(keys(&registry, "Disk").is_empty());
    }

    #[test]
    fn test_register_source_is_idempotent() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        let registry = registry(&provider, &[category("Memory", &[])]);

        assert!(registry
            .register_source("Memory", "Free Bytes", "", None)
            .expect("unknown category"));
        assert!(!registry
            .register_source("Memory", "Free Bytes", "", None)
            .expect("unknown category"));

        assert_eq!(keys(&registry, "Memory").len(), 1);
        // only the first registration primes
        assert_eq!(provider.reads("Memory", "Free Bytes", ""), 1);
    }

    #[test]
    fn test_matcher_rejects_instance() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Disk", &[]);
        let registry = registry(&provider, &[category("Disk", &[])]);
        let matcher = Regex::new("^C:").expect("invalid regex");

        assert!(!registry
            .register_source("Disk", "Free Space", "D:", Some(&matcher))
            .expect("unknown category"));
        assert!(keys(&registry, "Disk").is_empty());
    }

    #[test]
    fn test_unknown_category() {
        let provider = FakeCounterProvider::new();
        let registry = registry(&provider, &[]);

        assert!(matches!(
            registry.register_source("Nope", "x", "", None),
            Err(RegistryError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_invalid_pattern_is_construction_error() {
        let provider = FakeCounterProvider::new();
        let mut disk = category("Disk", &["Free Space"]);
        disk.instance_match_pattern = Some("([".to_string());

        let result = SourceRegistry::new(Arc::new(provider), &[disk]);

        assert!(matches!(result, Err(RegistryError::InvalidPattern { .. })));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        let registry = registry(&provider, &[category("Memory", &["Free Bytes"])]);
        let key = RegistrationKey::new("Free Bytes", "");

        assert!(registry.unregister_source("Memory", &key).expect("unknown category"));
        assert!(!registry.unregister_source("Memory", &key).expect("unknown category"));
        assert!(keys(&registry, "Memory").is_empty());
    }

    #[test]
    fn test_refresh_adds_new_instances_and_never_removes() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp"]);
        let registry = registry(&provider, &[category("Process", &["ID Process"])]);

        provider.set_instances("Process", &["w3wp#1"]);
        assert_eq!(registry.refresh("Process").expect("unknown category"), 1);

        let instances: Vec<String> = keys(&registry, "Process").into_iter().map(|k| k.1).collect();
        assert_eq!(instances, vec!["w3wp", "w3wp#1"]);
    }

    #[test]
    #[traced_test]
    fn test_enumeration_failure_keeps_registrations() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp"]);
        let registry = registry(&provider, &[category("Process", &["ID Process"])]);

        provider.fail_enumeration(true);
        assert_eq!(registry.refresh("Process").expect("unknown category"), 0);

        assert_eq!(keys(&registry, "Process").len(), 1);
        assert!(logs_contain("Failed to enumerate instances"));
    }

    #[test]
    #[traced_test]
    fn test_named_instances_register_when_enumeration_fails() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp"]);
        provider.fail_enumeration(true);
        let mut process = category("Process", &["Working Set"]);
        process.named_instances = vec!["_Total".to_string()];
        process.instance_match_pattern = Some("^w3wp".to_string());

        let registry = registry(&provider, &[process]);

        assert_eq!(
            keys(&registry, "Process"),
            vec![("Working Set".to_string(), "_Total".to_string())]
        );
        assert!(logs_contain("Failed to enumerate instances"));

        provider.fail_enumeration(false);
        assert_eq!(registry.refresh("Process").expect("unknown category"), 1);
        let instances: Vec<String> = keys(&registry, "Process").into_iter().map(|k| k.1).collect();
        assert_eq!(instances, vec!["_Total", "w3wp"]);
    }

    #[test]
    fn test_enumeration_failure_without_named_list_registers_nothing() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        provider.fail_enumeration(true);

        let registry = registry(&provider, &[category("Memory", &["Free Bytes"])]);

        assert!(keys(&registry, "Memory").is_empty());
    }

    /// Panics on its second read, which is the first sampled one.
    struct PanicOnceHandle {
        reads: usize,
    }

    impl CounterHandle for PanicOnceHandle {
        fn read_next(&mut self) -> Result<f64, CounterError> {
            self.reads += 1;
            if self.reads == 2 {
                panic!("counter driver fault");
            }
            Ok(3.0)
        }
    }

    struct FaultyProvider;

    impl CounterProvider for FaultyProvider {
        fn enumerate_categories(&self) -> Result<Vec<String>, CounterError> {
            Ok(vec!["Memory".to_string(), "Processor".to_string()])
        }

        fn enumerate_instances(&self, _category: &str) -> Result<Vec<String>, CounterError> {
            Ok(Vec::new())
        }

        fn open_counter(
            &self,
            category: &str,
            _counter: &str,
            _instance: &str,
        ) -> Result<Box<dyn CounterHandle>, CounterError> {
            if category == "Memory" {
                Ok(Box::new(PanicOnceHandle { reads: 0 }))
            } else {
                Ok(Box::new(PanicOnceHandle { reads: 2 }))
            }
        }
    }

    #[test]
    fn test_sampling_continues_after_a_handle_panics() {
        let registry = SourceRegistry::new(
            Arc::new(FaultyProvider),
            &[
                category("Memory", &["Free Bytes"]),
                category("Processor", &["% Processor Time"]),
            ],
        )
        .expect("failed to build registry");

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| registry.sample_pass()));
        assert!(first.is_err());

        let events = registry.sample_pass();
        let categories: Vec<&str> = events.iter().map(|e| e.category.as_str()).collect();
        assert_eq!(categories, vec!["Memory", "Processor"]);
        assert_eq!(keys(&registry, "Memory").len(), 1);
    }

    #[test]
    fn test_priming_read_is_discarded() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Processor", &["_Total"]);
        provider.script("Processor", "% Processor Time", "_Total", vec![Ok(0.0), Ok(42.5)]);

        let registry = registry(&provider, &[category("Processor", &["% Processor Time"])]);
        assert_eq!(provider.reads("Processor", "% Processor Time", "_Total"), 1);

        let events = registry.sample_pass();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 42.5);
        assert_eq!(provider.reads("Processor", "% Processor Time", "_Total"), 2);
    }

    #[test]
    #[traced_test]
    fn test_open_failure_is_logged_and_skipped() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp", "locked"]);
        provider.fail_open("Process", "Working Set", "locked");

        let registry = registry(&provider, &[category("Process", &["Working Set"])]);

        assert_eq!(
            keys(&registry, "Process"),
            vec![("Working Set".to_string(), "w3wp".to_string())]
        );
        assert!(logs_contain("Failed to open counter"));
    }

    #[test]
    fn test_pass_shares_timestamp_and_stamps_server_name() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        provider.set_value("Memory", "Available Bytes", "", 1024.0);
        provider.set_value("Memory", "Free Bytes", "", 512.0);

        let registry = registry(&provider, &[category("Memory", &["Available Bytes", "Free Bytes"])])
            .with_server_name("web01")
            .with_interval(5);
        let events = registry.sample_pass();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp, events[1].timestamp);
        assert!(events.iter().all(|e| e.interval == 5));
        assert!(events.iter().all(|e| e.server_name.as_deref() == Some("web01")));
        assert_eq!(events[0].value, 1024.0);
        assert_eq!(events[1].value, 512.0);
    }

    #[test]
    fn test_stale_entry_absent_only_from_next_pass() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp", "w3wp#1"]);
        let registry = registry(&provider, &[category("Process", &["ID Process"])]);

        provider.remove("Process", "ID Process", "w3wp");
        let first = registry.sample_pass();

        // the rest of the category was still read in the pass that saw it go
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].instance, "w3wp#1");
        assert_eq!(provider.reads("Process", "ID Process", "w3wp"), 2);

        let second = registry.sample_pass();
        assert_eq!(second.len(), 1);
        // no further read of the removed registration
        assert_eq!(provider.reads("Process", "ID Process", "w3wp"), 2);
        assert_eq!(keys(&registry, "Process").len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_transient_failure_keeps_registration() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Memory", &[]);
        provider.set_value("Memory", "Free Bytes", "", 7.0);
        let registry = registry(&provider, &[category("Memory", &["Free Bytes"])]);

        provider.script(
            "Memory",
            "Free Bytes",
            "",
            vec![Err(CounterError::Unavailable("busy".to_string()))],
        );
        assert!(registry.sample_pass().is_empty());
        assert!(logs_contain("Failed to read counter"));

        let events = registry.sample_pass();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 7.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_category_refreshes_on_timer() {
        let provider = FakeCounterProvider::new();
        provider.add_category("Process", &["w3wp"]);
        let mut process = category("Process", &["ID Process"]);
        process.dynamic = true;
        process.dynamic_interval_ms = Some(1000);

        let registry = Arc::new(registry(&provider, &[process]));
        let cancel = CancellationToken::new();
        let tasks = registry.spawn_refresh_tasks(&cancel);
        assert_eq!(tasks.len(), 1);

        provider.set_instances("Process", &["w3wp", "w3wp#1"]);
        let mut refreshed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if keys(&registry, "Process").len() == 2 {
                refreshed = true;
                break;
            }
        }
        assert!(refreshed, "dynamic refresh never registered the new instance");

        cancel.cancel();
        for task in tasks {
            task.await.expect("refresh task panicked");
        }
    }
}
