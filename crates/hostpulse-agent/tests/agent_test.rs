// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hostpulse::config::{CategoryConfig, SinkConfig, TargetConfig};
use hostpulse::provider::testing::{FakeCounterProvider, FakeDirectory};
use hostpulse_agent::config::{AgentConfig, SinksConfig, SiteEnrichmentSection, SourcesConfig, TransformsConfig};
use hostpulse_agent::services::{self, Providers, ServiceStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

fn category(name: &str, counters: &[&str], pattern: Option<&str>) -> CategoryConfig {
    CategoryConfig {
        name: name.to_string(),
        counters: counters.iter().map(|c| (*c).to_string()).collect(),
        instance_match_pattern: pattern.map(str::to_string),
        ..CategoryConfig::default()
    }
}

/// Paths received on `socket` until every one of `expected` was seen.
async fn receive_paths(socket: &UdpSocket, expected: &BTreeSet<String>) -> BTreeSet<String> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = BTreeSet::new();
    let mut buf = [0u8; 1024];
    while !expected.is_subset(&seen) && Instant::now() < deadline {
        let Ok(Ok((len, _))) = timeout(Duration::from_secs(1), socket.recv_from(&mut buf)).await
        else {
            continue;
        };
        let text = std::str::from_utf8(&buf[..len]).expect("not utf-8");
        for line in text.lines() {
            let fields: Vec<&str> = line.split(' ').collect();
            assert_eq!(fields.len(), 3, "malformed line {line:?}");
            seen.insert(fields[0].to_string());
        }
    }
    seen
}

#[tokio::test]
async fn test_agent_delivers_enriched_metrics() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    let port = receiver.local_addr().expect("no local addr").port();

    let counters = FakeCounterProvider::new();
    counters.add_category("Memory", &[]);
    counters.add_category("Process", &["w3wp", "w3wp#1", "sshd"]);
    counters.set_value("Memory", "Available Bytes", "", 1024.0);
    counters.set_value("Process", "ID Process", "w3wp", 100.0);
    counters.set_value("Process", "ID Process", "w3wp#1", 200.0);
    counters.set_value("Process", "Working Set", "w3wp", 4096.0);
    counters.set_value("Process", "Working Set", "w3wp#1", 8192.0);

    let directory = FakeDirectory::new();
    directory.set_processes(&[(100, "checkout"), (200, "search")]);

    let config = AgentConfig {
        interval_ms: 100,
        sources: SourcesConfig {
            categories: vec![
                category("Memory", &["Available Bytes"], None),
                category("Process", &["ID Process", "Working Set"], Some("^w3wp")),
            ],
        },
        transforms: TransformsConfig {
            site_enrichment: SiteEnrichmentSection {
                enabled: true,
                targets: vec![TargetConfig {
                    category: "Process".to_string(),
                    filters: vec!["worker_process".to_string()],
                    preserve_original: false,
                }],
                ..SiteEnrichmentSection::default()
            },
        },
        sinks: SinksConfig {
            graphite: vec![SinkConfig {
                hostname: "127.0.0.1".to_string(),
                port,
                prefix: "hosts".to_string(),
                ..SinkConfig::default()
            }],
            ..SinksConfig::default()
        },
        ..AgentConfig::default()
    };
    config.validate().expect("invalid config");

    let handle = services::start(
        &config,
        "web01",
        Providers {
            counters: Arc::new(counters.clone()),
            directory: Arc::new(directory),
        },
    )
    .expect("start failed");

    let expected: BTreeSet<String> = [
        "hosts.server.web01.memory._total.available_bytes",
        "hosts.site.checkout.web01.process._total.working_set",
        "hosts.site.search.web01.process._total.working_set",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    let seen = receive_paths(&receiver, &expected).await;

    assert!(expected.is_subset(&seen), "missing paths, got {seen:?}");
    assert!(
        seen.iter().all(|path| !path.contains("sshd")),
        "unmatched instance was delivered: {seen:?}"
    );

    handle.stop().await.expect("stop failed");
    assert_eq!(handle.status().await, ServiceStatus::Stopped);
}

#[tokio::test]
async fn test_stop_without_traffic() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind failed");
    let port = receiver.local_addr().expect("no local addr").port();
    let config = AgentConfig {
        sinks: SinksConfig {
            graphite: vec![SinkConfig {
                hostname: "127.0.0.1".to_string(),
                port,
                ..SinkConfig::default()
            }],
            ..SinksConfig::default()
        },
        ..AgentConfig::default()
    };

    let handle = services::start(
        &config,
        "web01",
        Providers {
            counters: Arc::new(FakeCounterProvider::new()),
            directory: Arc::new(FakeDirectory::new()),
        },
    )
    .expect("start failed");

    assert!(handle.is_running().await);
    timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("stop timed out")
        .expect("stop failed");
    assert!(!handle.is_running().await);
}
