// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::PipelineError;
use crate::event::MetricEvent;
use crate::pipeline::Sink;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Writes each event as one JSON document per line.
pub struct ConsoleSink {
    pretty: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    #[must_use]
    pub fn stdout(pretty: bool) -> Self {
        Self::with_writer(pretty, Box::new(io::stdout()))
    }

    #[must_use]
    pub fn with_writer(pretty: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            pretty,
            out: Mutex::new(out),
        }
    }

    fn render(&self, event: &MetricEvent) -> Result<String, serde_json::Error> {
        if self.pretty {
            serde_json::to_string_pretty(event)
        } else {
            serde_json::to_string(event)
        }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn deliver(&self, batch: &[MetricEvent]) -> Result<(), PipelineError> {
        let mut rendered = String::new();
        for event in batch {
            let line = self
                .render(event)
                .map_err(|e| PipelineError::Other(format!("failed to serialize {event}: {e}")))?;
            rendered.push_str(&line);
            rendered.push('\n');
        }

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(rendered.as_bytes())
            .and_then(|()| out.flush())
            .map_err(|e| PipelineError::Other(format!("failed to write to console: {e}")))
    }
}
