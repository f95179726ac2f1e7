// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Interfaces to the host's instrumentation and to the site/process directory.
//!
//! Both are blocking APIs; the registry and the enricher call them from the
//! blocking pool.

use crate::errors::{CounterError, DirectoryError};

/// A live handle to one counter instance.
pub trait CounterHandle: Send {
    /// Reads the next sample. Rate counters compute against the previous read,
    /// which is why a handle is primed once when it is opened.
    fn read_next(&mut self) -> Result<f64, CounterError>;
}

pub trait CounterProvider: Send + Sync {
    fn enumerate_categories(&self) -> Result<Vec<String>, CounterError>;

    fn enumerate_instances(&self, category: &str) -> Result<Vec<String>, CounterError>;

    /// Opens a handle. An empty `instance` opens the singleton counter.
    fn open_counter(
        &self,
        category: &str,
        counter: &str,
        instance: &str,
    ) -> Result<Box<dyn CounterHandle>, CounterError>;
}

/// A hosted site as reported by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecord {
    pub id: i64,
    pub name: String,
}

/// A running worker process and the name of the application that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i64,
    pub owner: String,
}

pub trait DirectoryProvider: Send + Sync {
    fn enumerate_sites(&self) -> Result<Vec<SiteRecord>, DirectoryError>;

    fn enumerate_active_processes(&self) -> Result<Vec<ProcessRecord>, DirectoryError>;
}

/// Directory with nothing in it. Used when no directory is available on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDirectory;

impl DirectoryProvider for EmptyDirectory {
    fn enumerate_sites(&self) -> Result<Vec<SiteRecord>, DirectoryError> {
        Ok(Vec::new())
    }

    fn enumerate_active_processes(&self) -> Result<Vec<ProcessRecord>, DirectoryError> {
        Ok(Vec::new())
    }
}

/// Scriptable in-memory providers for tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    type Key = (String, String, String);

    #[derive(Default)]
    struct State {
        categories: Vec<String>,
        instances: HashMap<String, Vec<String>>,
        values: HashMap<Key, f64>,
        scripted: HashMap<Key, VecDeque<Result<f64, CounterError>>>,
        missing: Vec<Key>,
        unopenable: Vec<Key>,
        reads: BTreeMap<Key, usize>,
        enumerate_fails: bool,
    }

    /// Counter provider backed by a table of values.
    ///
    /// Cloning shares the table, so a test can keep a handle and change what
    /// the registry sees between passes.
    #[derive(Clone, Default)]
    pub struct FakeCounterProvider {
        state: Arc<Mutex<State>>,
    }

    fn key(category: &str, counter: &str, instance: &str) -> Key {
        (category.to_string(), counter.to_string(), instance.to_string())
    }

    #[allow(clippy::expect_used)]
    impl FakeCounterProvider {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().expect("lock poisoned")
        }

        pub fn add_category(&self, category: &str, instances: &[&str]) {
            let mut state = self.state();
            if !state.categories.iter().any(|c| c == category) {
                state.categories.push(category.to_string());
            }
            state.instances.insert(
                category.to_string(),
                instances.iter().map(|i| (*i).to_string()).collect(),
            );
        }

        pub fn set_instances(&self, category: &str, instances: &[&str]) {
            self.add_category(category, instances);
        }

        pub fn set_value(&self, category: &str, counter: &str, instance: &str, value: f64) {
            self.state()
                .values
                .insert(key(category, counter, instance), value);
        }

        /// Queues results returned by the next reads of one counter before the
        /// table value is used again.
        pub fn script(
            &self,
            category: &str,
            counter: &str,
            instance: &str,
            results: Vec<Result<f64, CounterError>>,
        ) {
            self.state()
                .scripted
                .entry(key(category, counter, instance))
                .or_default()
                .extend(results);
        }

        /// Makes every read of the counter fail with `NotFound`.
        pub fn remove(&self, category: &str, counter: &str, instance: &str) {
            self.state().missing.push(key(category, counter, instance));
        }

        pub fn fail_open(&self, category: &str, counter: &str, instance: &str) {
            self.state()
                .unopenable
                .push(key(category, counter, instance));
        }

        pub fn fail_enumeration(&self, fail: bool) {
            self.state().enumerate_fails = fail;
        }

        /// Number of reads performed against the counter, priming included.
        #[must_use]
        pub fn reads(&self, category: &str, counter: &str, instance: &str) -> usize {
            self.state()
                .reads
                .get(&key(category, counter, instance))
                .copied()
                .unwrap_or_default()
        }

        fn read(&self, key: &Key) -> Result<f64, CounterError> {
            let mut state = self.state();
            *state.reads.entry(key.clone()).or_default() += 1;
            if let Some(result) = state.scripted.get_mut(key).and_then(VecDeque::pop_front) {
                return result;
            }
            if state.missing.contains(key) {
                return Err(CounterError::NotFound(format!("{}/{}/{}", key.0, key.1, key.2)));
            }
            Ok(state.values.get(key).copied().unwrap_or_default())
        }
    }

    #[allow(clippy::expect_used)]
    impl CounterProvider for FakeCounterProvider {
        fn enumerate_categories(&self) -> Result<Vec<String>, CounterError> {
            Ok(self.state().categories.clone())
        }

        fn enumerate_instances(&self, category: &str) -> Result<Vec<String>, CounterError> {
            let state = self.state();
            if state.enumerate_fails {
                return Err(CounterError::Unavailable("enumeration disabled".to_string()));
            }
            state
                .instances
                .get(category)
                .cloned()
                .ok_or_else(|| CounterError::NotFound(category.to_string()))
        }

        fn open_counter(
            &self,
            category: &str,
            counter: &str,
            instance: &str,
        ) -> Result<Box<dyn CounterHandle>, CounterError> {
            let key = key(category, counter, instance);
            if self.state().unopenable.contains(&key) {
                return Err(CounterError::Unavailable(format!(
                    "cannot open {category}/{counter}/{instance}"
                )));
            }
            Ok(Box::new(FakeHandle {
                provider: self.clone(),
                key,
            }))
        }
    }

    struct FakeHandle {
        provider: FakeCounterProvider,
        key: Key,
    }

    impl CounterHandle for FakeHandle {
        fn read_next(&mut self) -> Result<f64, CounterError> {
            self.provider.read(&self.key)
        }
    }

    #[derive(Default)]
    struct DirectoryState {
        sites: Vec<SiteRecord>,
        processes: Vec<ProcessRecord>,
        fail: bool,
        process_calls: usize,
    }

    /// Directory provider backed by editable lists.
    #[derive(Clone, Default)]
    pub struct FakeDirectory {
        state: Arc<Mutex<DirectoryState>>,
    }

    #[allow(clippy::expect_used)]
    impl FakeDirectory {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
            self.state.lock().expect("lock poisoned")
        }

        pub fn set_sites(&self, sites: &[(i64, &str)]) {
            self.state().sites = sites
                .iter()
                .map(|(id, name)| SiteRecord {
                    id: *id,
                    name: (*name).to_string(),
                })
                .collect();
        }

        pub fn set_processes(&self, processes: &[(i64, &str)]) {
            self.state().processes = processes
                .iter()
                .map(|(pid, owner)| ProcessRecord {
                    pid: *pid,
                    owner: (*owner).to_string(),
                })
                .collect();
        }

        pub fn set_failing(&self, fail: bool) {
            self.state().fail = fail;
        }

        #[must_use]
        pub fn process_calls(&self) -> usize {
            self.state().process_calls
        }
    }

    #[allow(clippy::expect_used)]
    impl DirectoryProvider for FakeDirectory {
        fn enumerate_sites(&self) -> Result<Vec<SiteRecord>, DirectoryError> {
            let state = self.state();
            if state.fail {
                return Err(DirectoryError::Unavailable("directory offline".to_string()));
            }
            Ok(state.sites.clone())
        }

        fn enumerate_active_processes(&self) -> Result<Vec<ProcessRecord>, DirectoryError> {
            let mut state = self.state();
            state.process_calls += 1;
            if state.fail {
                return Err(DirectoryError::Unavailable("directory offline".to_string()));
            }
            Ok(state.processes.clone())
        }
    }
}
