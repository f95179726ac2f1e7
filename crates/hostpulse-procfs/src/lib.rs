// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counter provider reading the Linux `/proc` filesystem.
//!
//! Three categories are exposed:
//!
//! - `Memory`, singleton counters from `/proc/meminfo`
//! - `Processor`, instances `_Total` and one per cpu from `/proc/stat`
//! - `Process`, one instance per running process, named after its command
//!   with `#1`, `#2`, ... appended to repeated names

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cpu;
pub mod memory;
pub mod process;

use hostpulse::errors::{CounterError, DirectoryError};
use hostpulse::provider::{CounterHandle, CounterProvider, ProcessRecord};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const MEMORY: &str = "Memory";
pub const PROCESSOR: &str = "Processor";
pub const PROCESS: &str = "Process";

const DEFAULT_PROC_ROOT: &str = "/proc";

#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    root: PathBuf,
    names: Arc<process::ProcessNames>,
}

impl Default for ProcfsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Reads from a `/proc`-shaped tree at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            names: Arc::default(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Running processes, owned by their systemd unit or else by their command.
    pub fn list_processes(&self) -> Result<Vec<ProcessRecord>, DirectoryError> {
        process::list(&self.root).map_err(|e| DirectoryError::Unavailable(e.to_string()))
    }
}

impl CounterProvider for ProcfsProvider {
    fn enumerate_categories(&self) -> Result<Vec<String>, CounterError> {
        Ok(vec![
            MEMORY.to_string(),
            PROCESSOR.to_string(),
            PROCESS.to_string(),
        ])
    }

    fn enumerate_instances(&self, category: &str) -> Result<Vec<String>, CounterError> {
        match category {
            MEMORY => Ok(Vec::new()),
            PROCESSOR => cpu::instances(&self.root),
            PROCESS => self.names.instances(&self.root),
            _ => Err(CounterError::NotFound(format!("category {category}"))),
        }
    }

    fn open_counter(
        &self,
        category: &str,
        counter: &str,
        instance: &str,
    ) -> Result<Box<dyn CounterHandle>, CounterError> {
        match category {
            MEMORY => memory::open(&self.root, counter, instance),
            PROCESSOR => cpu::open(&self.root, counter, instance),
            PROCESS => process::open(&self.root, &self.names, counter, instance),
            _ => Err(CounterError::NotFound(format!("category {category}"))),
        }
    }
}

/// Reads a whole file, reporting a missing file as a missing counter.
pub(crate) fn read(path: &Path) -> Result<String, CounterError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CounterError::NotFound(path.display().to_string()),
        _ => CounterError::Io(e),
    })
}
