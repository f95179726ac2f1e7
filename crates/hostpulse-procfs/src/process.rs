// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Process` counters from `/proc/<pid>`.
//!
//! Instance names are command names. When several processes share a command,
//! the one with the lowest pid keeps the bare name and the others get `#1`,
//! `#2`, ... in pid order. A handle stays bound to the process it was opened
//! for: once that process exits, or its pid is reused, reads report the
//! counter as gone.

use crate::memory::meminfo_bytes;
use crate::read;
use hostpulse::errors::CounterError;
use hostpulse::provider::{CounterHandle, ProcessRecord};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    Id,
    WorkingSet,
    PrivateBytes,
    ThreadCount,
}

impl Measure {
    fn from_counter(counter: &str) -> Option<Self> {
        match counter.to_ascii_lowercase().as_str() {
            "id process" => Some(Measure::Id),
            "working set" => Some(Measure::WorkingSet),
            "private bytes" => Some(Measure::PrivateBytes),
            "thread count" => Some(Measure::ThreadCount),
            _ => None,
        }
    }
}

/// Pids under `root`, ascending.
fn pids(root: &Path) -> io::Result<Vec<i64>> {
    let mut pids: Vec<i64> = fs::read_dir(root)?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

fn comm(root: &Path, pid: i64) -> Option<String> {
    fs::read_to_string(root.join(pid.to_string()).join("comm"))
        .ok()
        .map(|comm| comm.trim_end().to_string())
        .filter(|comm| !comm.is_empty())
}

/// Instance name of every live process, paired with its pid.
fn named_processes(root: &Path) -> io::Result<Vec<(String, i64)>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut named = Vec::new();
    for pid in pids(root)? {
        let Some(comm) = comm(root, pid) else {
            continue;
        };
        let count = seen.entry(comm.clone()).or_default();
        let instance = match *count {
            0 => comm,
            n => format!("{comm}#{n}"),
        };
        *count += 1;
        named.push((instance, pid));
    }
    Ok(named)
}

/// Instance names resolved by the last scan of `/proc`.
///
/// A category refresh enumerates instances and then opens every counter of
/// every instance, so opening looks names up here instead of rescanning.
#[derive(Debug, Default)]
pub(crate) struct ProcessNames {
    by_name: Mutex<HashMap<String, i64>>,
}

impl ProcessNames {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.by_name.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scan(&self, root: &Path) -> io::Result<Vec<(String, i64)>> {
        let named = named_processes(root)?;
        *self.lock() = named.iter().cloned().collect();
        Ok(named)
    }

    pub(crate) fn instances(&self, root: &Path) -> Result<Vec<String>, CounterError> {
        Ok(self
            .scan(root)?
            .into_iter()
            .map(|(instance, _)| instance)
            .collect())
    }

    /// Pid of `instance`, rescanning when it is unknown or its process is gone.
    fn pid_of(&self, root: &Path, instance: &str) -> Result<i64, CounterError> {
        let cached = self.lock().get(instance).copied();
        if let Some(pid) = cached.filter(|pid| root.join(pid.to_string()).is_dir()) {
            return Ok(pid);
        }
        self.scan(root)?
            .into_iter()
            .find_map(|(name, pid)| (name == instance).then_some(pid))
            .ok_or_else(|| CounterError::NotFound(format!("Process/{instance}")))
    }
}

/// Start time of a process in clock ticks since boot, used to tell a pid
/// apart from a later process reusing it.
fn start_time(stat: &str) -> Option<u64> {
    // the command may contain spaces and parentheses, fields resume after the last ')'
    let (_, fields) = stat.rsplit_once(')')?;
    fields.split_whitespace().nth(19)?.parse().ok()
}

pub(crate) fn open(
    root: &Path,
    names: &ProcessNames,
    counter: &str,
    instance: &str,
) -> Result<Box<dyn CounterHandle>, CounterError> {
    let measure = Measure::from_counter(counter)
        .ok_or_else(|| CounterError::NotFound(format!("Process/{counter}")))?;
    let pid = names.pid_of(root, instance)?;

    let dir = root.join(pid.to_string());
    let started = start_time(&read(&dir.join("stat"))?);
    debug!(instance, pid, "Opened process counter");

    Ok(Box::new(ProcessCounter {
        dir,
        pid,
        started,
        measure,
    }))
}

struct ProcessCounter {
    dir: PathBuf,
    pid: i64,
    started: Option<u64>,
    measure: Measure,
}

impl ProcessCounter {
    fn gone(&self) -> CounterError {
        CounterError::NotFound(format!("process {} exited", self.pid))
    }
}

impl CounterHandle for ProcessCounter {
    #[allow(clippy::cast_precision_loss)]
    fn read_next(&mut self) -> Result<f64, CounterError> {
        let stat = read(&self.dir.join("stat"))?;
        if start_time(&stat) != self.started {
            return Err(self.gone());
        }
        if self.measure == Measure::Id {
            return Ok(self.pid as f64);
        }

        let status = read(&self.dir.join("status"))?;
        let value = match self.measure {
            Measure::WorkingSet => meminfo_bytes(&status, "VmRSS"),
            Measure::PrivateBytes => meminfo_bytes(&status, "RssAnon"),
            Measure::ThreadCount => meminfo_bytes(&status, "Threads"),
            Measure::Id => None,
        };
        // kernel threads have no memory fields
        Ok(value.unwrap_or_default())
    }
}

/// Owning systemd unit of a process, from its cgroup path.
fn systemd_unit(cgroup: &str) -> Option<String> {
    cgroup.lines().find_map(|line| {
        let path = line.splitn(3, ':').nth(2)?;
        path.rsplit('/')
            .find_map(|segment| segment.strip_suffix(".service"))
            .map(str::to_string)
    })
}

pub(crate) fn list(root: &Path) -> io::Result<Vec<ProcessRecord>> {
    let mut processes = Vec::new();
    for pid in pids(root)? {
        let unit = fs::read_to_string(root.join(pid.to_string()).join("cgroup"))
            .ok()
            .and_then(|cgroup| systemd_unit(&cgroup));
        let Some(owner) = unit.or_else(|| comm(root, pid)) else {
            continue;
        };
        processes.push(ProcessRecord { pid, owner });
    }
    Ok(processes)
}
