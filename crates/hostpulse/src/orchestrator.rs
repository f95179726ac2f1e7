// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs the pipeline: sources, then transforms, then sinks, once per tick.

use crate::errors::PipelineError;
use crate::event::MetricEvent;
use crate::pipeline::{Sink, Source, Transform};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Transform,
    Sink,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Source => write!(f, "source"),
            Stage::Transform => write!(f, "transform"),
            Stage::Sink => write!(f, "sink"),
        }
    }
}

/// A plugin call that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub plugin: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Events produced by all sources.
    pub collected: usize,
    /// Size of the batch handed to the sinks.
    pub delivered: usize,
    pub failures: Vec<StageFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another pass was still running.
    Skipped,
    Completed(TickReport),
}

#[derive(Default)]
pub struct Orchestrator {
    sources: Vec<Arc<dyn Source>>,
    transforms: Vec<Arc<dyn Transform>>,
    sinks: Vec<Arc<dyn Sink>>,
    tick_lock: Mutex<()>,
}

impl Orchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(&mut self, source: Arc<dyn Source>) {
        info!(source = source.name(), "Registered source");
        self.sources.push(source);
    }

    pub fn register_transform(&mut self, transform: Arc<dyn Transform>) {
        info!(transform = transform.name(), "Registered transform");
        self.transforms.push(transform);
    }

    pub fn register_sink(&mut self, sink: Arc<dyn Sink>) {
        info!(sink = sink.name(), "Registered sink");
        self.sinks.push(sink);
    }

    /// Runs one pass unless one is already running, in which case this call
    /// returns [`TickOutcome::Skipped`] right away.
    pub fn run_tick(&self) -> TickOutcome {
        let _guard = match self.tick_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                info!("Previous pass still running, skipping tick");
                return TickOutcome::Skipped;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let started = Instant::now();
        let mut report = TickReport::default();

        let mut batch: Vec<MetricEvent> = Vec::new();
        for source in &self.sources {
            if let Some(events) = isolate(&mut report, Stage::Source, source.name(), || source.collect()) {
                batch.extend(events);
            }
        }
        report.collected = batch.len();

        for transform in &self.transforms {
            let input = batch.clone();
            if let Some(output) =
                isolate(&mut report, Stage::Transform, transform.name(), || transform.apply(input))
            {
                batch = output;
            }
        }
        report.delivered = batch.len();

        for sink in &self.sinks {
            let _ = isolate(&mut report, Stage::Sink, sink.name(), || sink.deliver(&batch));
        }

        debug!(
            collected = report.collected,
            delivered = report.delivered,
            failures = report.failures.len(),
            "Pass completed in {:?}",
            started.elapsed()
        );
        TickOutcome::Completed(report)
    }

    /// Runs a pass on the blocking pool every `period` until `cancel` fires,
    /// then waits for passes still in flight.
    pub fn spawn(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // discard first tick, which is instantaneous

            let mut in_flight: Vec<JoinHandle<TickOutcome>> = Vec::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                in_flight.retain(|pass| !pass.is_finished());
                let orchestrator = Arc::clone(&self);
                in_flight.push(tokio::task::spawn_blocking(move || orchestrator.run_tick()));
            }

            for pass in in_flight {
                if let Err(e) = pass.await {
                    error!("Pipeline pass ended abnormally: {e}");
                }
            }
            info!("Pipeline scheduler stopped");
        })
    }
}

/// Calls one plugin, turning an error or a panic into a recorded failure.
fn isolate<T>(
    report: &mut TickReport,
    stage: Stage,
    plugin: &str,
    call: impl FnOnce() -> Result<T, PipelineError>,
) -> Option<T> {
    let message = match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(e)) => {
            error!(%stage, plugin, "Plugin call failed: {e}");
            e.to_string()
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%stage, plugin, "Plugin call panicked: {message}");
            message
        }
    };
    report.failures.push(StageFailure {
        stage,
        plugin: plugin.to_string(),
        message,
    });
    None
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
