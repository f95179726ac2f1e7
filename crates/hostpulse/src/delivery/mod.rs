// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Graphite delivery.
//!
//! The tick hands events to a bounded spool without ever waiting; a single
//! worker drains the spool and ships one line at a time over the configured
//! transport.

pub mod path;
pub mod transport;

use crate::config::SinkConfig;
use crate::constants::DEFAULT_RECONNECT_BACKOFF;
use crate::errors::{DeliveryError, PipelineError};
use crate::event::MetricEvent;
use crate::pipeline::Sink;
use path::LineFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use transport::Transport;

pub struct GraphiteSink {
    name: String,
    sender: Sender<MetricEvent>,
    dropped: AtomicU64,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GraphiteSink {
    /// Starts the delivery worker. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(config: SinkConfig) -> Self {
        Self::start_with_backoff(config, DEFAULT_RECONNECT_BACKOFF)
    }

    /// Same as [`GraphiteSink::start`] with a custom tcp reconnect pause.
    #[must_use]
    pub fn start_with_backoff(config: SinkConfig, backoff: Duration) -> Self {
        let name = format!("graphite {}:{}", config.hostname, config.port);
        let (sender, receiver) = mpsc::channel(config.buffer_capacity());
        let cancel = CancellationToken::new();
        let worker = Worker {
            receiver,
            transport: Transport::from_config(&config, backoff),
            format: LineFormat::new(config.prefix.clone(), config.server_name.clone()),
            debug: config.debug,
            cancel: cancel.clone(),
        };
        info!(
            sink = name,
            protocol = ?config.protocol,
            capacity = config.buffer_capacity(),
            "Starting graphite sink"
        );

        Self {
            name,
            sender,
            dropped: AtomicU64::new(0),
            cancel,
            worker: Mutex::new(Some(tokio::spawn(worker.run()))),
        }
    }

    /// Enqueues every event without waiting. Events that do not fit are
    /// dropped. Returns the number of events enqueued.
    pub fn accept(&self, batch: &[MetricEvent]) -> usize {
        let mut accepted = 0;
        for event in batch {
            match self.sender.try_send(event.clone()) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let dropped = batch.len() - accepted;
        if dropped > 0 {
            debug!(sink = self.name, dropped, "Delivery queue full, dropped events");
        }
        accepted
    }

    /// Events dropped since the sink started.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Stops the worker, abandoning queued events, and waits for it to release
    /// its connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(sink = self.name, "Delivery worker ended abnormally: {e}");
            }
        }
    }
}

impl Sink for GraphiteSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, batch: &[MetricEvent]) -> Result<(), PipelineError> {
        if !self.is_running() {
            return Err(DeliveryError::WorkerStopped.into());
        }
        self.accept(batch);
        Ok(())
    }
}

struct Worker {
    receiver: Receiver<MetricEvent>,
    transport: Transport,
    format: LineFormat,
    debug: bool,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let line = match self.format.format(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Dropping {event}: {e}");
                    continue;
                }
            };
            if self.debug {
                debug!("Sending {}", line.trim_end());
            }
            if self.transport.send(line.as_bytes(), &self.cancel).await.is_err() {
                break;
            }
        }
        info!("Delivery worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, UdpSocket};
    use tokio::time::timeout;

    fn event(value: f64) -> MetricEvent {
        MetricEvent::new("CPU Usage", "% Processor Time", "", value, 1_700_000_000, 10)
    }

    fn config(port: u16, protocol: Protocol, capacity: usize) -> SinkConfig {
        SinkConfig {
            hostname: "127.0.0.1".to_string(),
            port,
            protocol,
            prefix: "app".to_string(),
            server_name: Some("web01".to_string()),
            send_buffer_size: capacity,
            debug: true,
        }
    }

    async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        listener.local_addr().expect("no local addr").port()
    }

    #[tokio::test]
    async fn test_udp_sends_one_datagram_per_event() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
        let port = receiver.local_addr().expect("no local addr").port();
        let sink = GraphiteSink::start(config(port, Protocol::Udp, 10));

        assert_eq!(sink.accept(&[event(12.5)]), 1);

        let mut buf = [0u8; 256];
        let (len, _) = timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
            .await
            .expect("no datagram received")
            .expect("recv failed");
        assert_eq!(
            std::str::from_utf8(&buf[..len]).expect("not utf-8"),
            "app.server.web01.cpu_usage._total.%_processor_time 12.5 1700000000\n"
        );

        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // nothing listens, so the worker stays stuck on its first event
        let port = unused_port().await;
        let sink = GraphiteSink::start_with_backoff(
            config(port, Protocol::Tcp, 2),
            Duration::from_secs(60),
        );

        let batch: Vec<MetricEvent> = (0..10).map(|i| event(f64::from(i))).collect();
        let accepted = sink.accept(&batch);

        assert!(accepted <= 3, "accepted {accepted} events into a queue of 2");
        assert_eq!(sink.dropped(), 10 - accepted as u64);

        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_outage_delivers_exactly_once() {
        let port = unused_port().await;
        let sink = GraphiteSink::start_with_backoff(
            config(port, Protocol::Tcp, 10),
            Duration::from_millis(100),
        );

        sink.accept(&[event(99.0)]);
        // let a few connection attempts fail
        tokio::time::sleep(Duration::from_millis(350)).await;

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind failed");
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("sink never reconnected")
            .expect("accept failed");
        let mut reader = BufReader::new(stream);

        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("no line received")
            .expect("read failed");
        assert_eq!(
            line,
            "app.server.web01.cpu_usage._total.%_processor_time 99 1700000000\n"
        );

        let mut extra = String::new();
        let duplicate = timeout(Duration::from_millis(500), reader.read_line(&mut extra)).await;
        assert!(
            duplicate.is_err() || extra.is_empty(),
            "event delivered more than once: {extra:?}"
        );

        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_tcp_preserves_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
        let port = listener.local_addr().expect("no local addr").port();
        let sink = GraphiteSink::start(config(port, Protocol::Tcp, 10));

        sink.accept(&[event(1.0), event(2.0), event(3.0)]);

        let (stream, _) = listener.accept().await.expect("accept failed");
        let mut lines = BufReader::new(stream).lines();
        let mut values = Vec::new();
        for _ in 0..3 {
            let line = timeout(Duration::from_secs(5), lines.next_line())
                .await
                .expect("no line received")
                .expect("read failed")
                .expect("connection closed");
            values.push(line.split(' ').nth(1).map(str::to_string));
        }
        assert_eq!(
            values,
            vec![Some("1".to_string()), Some("2".to_string()), Some("3".to_string())]
        );

        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry() {
        let port = unused_port().await;
        let sink = GraphiteSink::start_with_backoff(
            config(port, Protocol::Tcp, 10),
            Duration::from_secs(3600),
        );
        sink.accept(&[event(1.0)]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(5), sink.shutdown())
            .await
            .expect("shutdown waited for the retry backoff");

        assert!(!sink.is_running());
        assert!(sink.deliver(&[event(2.0)]).is_err());
    }
}
