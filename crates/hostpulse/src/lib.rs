// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Core of the hostpulse telemetry agent.
//!
//! A tick-driven pipeline samples instrumentation counters through a
//! [`registry::SourceRegistry`], enriches the samples with the
//! [`transform::TransformChain`], and forwards them to Graphite through the
//! [`delivery::GraphiteSink`]. The [`orchestrator::Orchestrator`] owns the timer
//! and isolates every plugin call so one defect never stops a tick.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod console;
pub mod constants;
pub mod delivery;
pub mod errors;
pub mod event;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod registry;
pub mod transform;

pub use event::MetricEvent;
pub use pipeline::{Sink, Source, Transform};
