// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `Memory` counters from `/proc/meminfo`, reported in bytes.

use crate::read;
use hostpulse::errors::CounterError;
use hostpulse::provider::CounterHandle;
use std::path::{Path, PathBuf};

const COUNTERS: [(&str, &str); 4] = [
    ("Available Bytes", "MemAvailable"),
    ("Free Bytes", "MemFree"),
    ("Cached Bytes", "Cached"),
    ("Committed Bytes", "Committed_AS"),
];

pub(crate) fn open(
    root: &Path,
    counter: &str,
    instance: &str,
) -> Result<Box<dyn CounterHandle>, CounterError> {
    if !instance.is_empty() {
        return Err(CounterError::NotFound(format!("Memory has no instance {instance}")));
    }
    let field = COUNTERS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(counter))
        .map(|(_, field)| *field)
        .ok_or_else(|| CounterError::NotFound(format!("Memory/{counter}")))?;

    Ok(Box::new(MemoryCounter {
        path: root.join("meminfo"),
        field,
    }))
}

struct MemoryCounter {
    path: PathBuf,
    field: &'static str,
}

impl CounterHandle for MemoryCounter {
    fn read_next(&mut self) -> Result<f64, CounterError> {
        let contents = read(&self.path)?;
        meminfo_bytes(&contents, self.field)
            .ok_or_else(|| CounterError::NotFound(format!("{} in {}", self.field, self.path.display())))
    }
}

/// Value of a `/proc/meminfo` style field, converted from kB to bytes.
pub(crate) fn meminfo_bytes(contents: &str, field: &str) -> Option<f64> {
    contents.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != field {
            return None;
        }
        let mut parts = rest.split_whitespace();
        let value = parts.next()?.parse::<u64>().ok()?;
        let multiplier = match parts.next() {
            Some("kB") => 1024,
            _ => 1,
        };
        #[allow(clippy::cast_precision_loss)]
        Some((value * multiplier) as f64)
    })
}
