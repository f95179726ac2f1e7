// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::{Protocol, SinkConfig};
use crate::errors::DeliveryError;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Wire transport of a Graphite sink, chosen once from its protocol.
pub enum Transport {
    Udp(UdpTransport),
    Tcp(TcpTransport),
}

impl Transport {
    #[must_use]
    pub fn from_config(config: &SinkConfig, backoff: Duration) -> Self {
        match config.protocol {
            Protocol::Udp => Transport::Udp(UdpTransport::new(
                config.hostname.clone(),
                config.port,
            )),
            Protocol::Tcp => Transport::Tcp(TcpTransport::new(
                config.hostname.clone(),
                config.port,
                backoff,
            )),
        }
    }

    /// Ships one line. Only fails when `cancel` fires before the line is sent.
    pub async fn send(&mut self, line: &[u8], cancel: &CancellationToken) -> Result<(), DeliveryError> {
        match self {
            Transport::Udp(udp) => {
                udp.send(line).await;
                Ok(())
            }
            Transport::Tcp(tcp) => tcp.send(line, cancel).await,
        }
    }
}

/// One datagram per line, no retry.
pub struct UdpTransport {
    host: String,
    port: u16,
    address: String,
    socket: Option<(UdpSocket, SocketAddr)>,
}

/// Wildcard address of the same family as `target`.
fn local_addr_for(target: &SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

impl UdpTransport {
    fn new(host: String, port: u16) -> Self {
        Self {
            address: format!("{host}:{port}"),
            host,
            port,
            socket: None,
        }
    }

    async fn bind(&self) -> io::Result<(UdpSocket, SocketAddr)> {
        let target = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", self.address))
            })?;
        let socket = UdpSocket::bind(local_addr_for(&target)).await?;
        debug!(address = self.address, %target, "Bound udp socket");
        Ok((socket, target))
    }

    async fn send(&mut self, line: &[u8]) {
        if let Err(e) = self.try_send(line).await {
            error!(address = self.address, "Failed to send datagram, dropping: {e}");
        }
    }

    async fn try_send(&mut self, line: &[u8]) -> io::Result<()> {
        let bound = match self.socket.take() {
            Some(bound) => bound,
            None => self.bind().await?,
        };
        let (socket, target) = &bound;
        let result = socket.send_to(line, *target).await.map(|_| ());
        // resolve again after a failure, the target may have moved
        if result.is_ok() {
            self.socket = Some(bound);
        }
        result
    }
}

/// Persistent stream connection, reopened after any failure.
pub struct TcpTransport {
    host: String,
    port: u16,
    address: String,
    backoff: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    fn new(host: String, port: u16, backoff: Duration) -> Self {
        Self {
            address: format!("{host}:{port}"),
            host,
            port,
            backoff,
            stream: None,
        }
    }

    /// Retries the same line until it is written, pausing `backoff` after
    /// every failure.
    async fn send(&mut self, line: &[u8], cancel: &CancellationToken) -> Result<(), DeliveryError> {
        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(DeliveryError::WorkerStopped),
                result = self.try_send(line) => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.stream = None;
                    warn!(
                        address = self.address,
                        "Failed to send over tcp, retrying in {:?}: {e}",
                        self.backoff
                    );
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(DeliveryError::WorkerStopped),
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }

    async fn try_send(&mut self, line: &[u8]) -> io::Result<()> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
                debug!(address = self.address, "Connected");
                stream
            }
        };
        let stream = self.stream.insert(stream);
        stream.write_all(line).await?;
        stream.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_addr_matches_target_family() {
        let v4: SocketAddr = "10.0.0.5:2003".parse().expect("invalid address");
        let v6: SocketAddr = "[2001:db8::5]:2003".parse().expect("invalid address");

        assert_eq!(local_addr_for(&v4), "0.0.0.0:0".parse::<SocketAddr>().expect("invalid address"));
        assert_eq!(local_addr_for(&v6), "[::]:0".parse::<SocketAddr>().expect("invalid address"));
    }

    #[tokio::test]
    async fn test_udp_bind_resolves_ipv4_literal() {
        let udp = UdpTransport::new("127.0.0.1".to_string(), 2003);

        let (socket, target) = udp.bind().await.expect("bind failed");

        assert_eq!(target, "127.0.0.1:2003".parse::<SocketAddr>().expect("invalid address"));
        assert!(socket.local_addr().expect("no local addr").is_ipv4());
    }
}
