// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Processor` counters from `/proc/stat`.
//!
//! The kernel reports cumulative jiffies, so every counter is a percentage of
//! the time elapsed since the handle's previous read. The first read only
//! records the baseline and returns zero.

use crate::read;
use hostpulse::errors::CounterError;
use hostpulse::provider::CounterHandle;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TOTAL_INSTANCE: &str = "_Total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    Processor,
    User,
    Idle,
}

impl Measure {
    fn from_counter(counter: &str) -> Option<Self> {
        match counter.to_ascii_lowercase().as_str() {
            "% processor time" => Some(Measure::Processor),
            "% user time" => Some(Measure::User),
            "% idle time" => Some(Measure::Idle),
            _ => None,
        }
    }
}

/// Cumulative jiffies of one `cpu` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Jiffies {
    user: u64,
    idle: u64,
    total: u64,
}

fn line_label(instance: &str) -> String {
    if instance == TOTAL_INSTANCE {
        "cpu".to_string()
    } else {
        format!("cpu{instance}")
    }
}

fn parse_line(stat: &str, label: &str) -> Option<Jiffies> {
    let line = stat
        .lines()
        .find(|line| line.split_whitespace().next() == Some(label))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal, guest time is already in user
    let total = values.iter().take(8).sum();
    let idle = values[3] + values.get(4).copied().unwrap_or_default();
    Some(Jiffies {
        user: values[0] + values[1],
        idle,
        total,
    })
}

pub(crate) fn instances(root: &Path) -> Result<Vec<String>, CounterError> {
    let stat = read(&root.join("stat"))?;
    let mut instances = vec![TOTAL_INSTANCE.to_string()];
    instances.extend(stat.lines().filter_map(|line| {
        let label = line.split_whitespace().next()?;
        let index = label.strip_prefix("cpu")?;
        (!index.is_empty() && index.chars().all(|c| c.is_ascii_digit())).then(|| index.to_string())
    }));
    Ok(instances)
}

pub(crate) fn open(
    root: &Path,
    counter: &str,
    instance: &str,
) -> Result<Box<dyn CounterHandle>, CounterError> {
    let measure = Measure::from_counter(counter)
        .ok_or_else(|| CounterError::NotFound(format!("Processor/{counter}")))?;
    let instance = if instance.is_empty() {
        TOTAL_INSTANCE
    } else {
        instance
    };
    Ok(Box::new(CpuCounter {
        path: root.join("stat"),
        label: line_label(instance),
        measure,
        previous: None,
    }))
}

struct CpuCounter {
    path: PathBuf,
    label: String,
    measure: Measure,
    previous: Option<Jiffies>,
}

impl CounterHandle for CpuCounter {
    #[allow(clippy::cast_precision_loss)]
    fn read_next(&mut self) -> Result<f64, CounterError> {
        let stat = read(&self.path)?;
        let current = parse_line(&stat, &self.label)
            .ok_or_else(|| CounterError::NotFound(format!("{} in {}", self.label, self.path.display())))?;

        let Some(previous) = self.previous.replace(current) else {
            debug!(cpu = self.label, "Recorded cpu baseline");
            return Ok(0.0);
        };

        let elapsed = current.total.saturating_sub(previous.total);
        if elapsed == 0 {
            return Ok(0.0);
        }
        let idle = current.idle.saturating_sub(previous.idle);
        let user = current.user.saturating_sub(previous.user);
        let share = match self.measure {
            Measure::Processor => elapsed.saturating_sub(idle),
            Measure::User => user,
            Measure::Idle => idle,
        };
        Ok(100.0 * share as f64 / elapsed as f64)
    }
}
