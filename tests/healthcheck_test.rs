//! Startup and periodic health-check behaviour, including demotion,
//! promotion, and failback of the original primary.

mod common;

use std::sync::Arc;

use common::{proxy_config, spawn_proxy, MockBeacon};

use beacon_proxy::health::StartupError;
use beacon_proxy::observability::metrics::Metrics;
use beacon_proxy::{HealthChecker, LoadBalancer};

const HEAD_PATH: &str = "/eth/v1/beacon/headers/head";

#[tokio::test]
async fn startup_fails_when_no_node_is_synced() {
    let primary = MockBeacon::spawn(200, r#"{"data":{}}"#).await;
    let backup = MockBeacon::spawn(200, r#"{"data":{}}"#).await;
    primary.set_syncing(true);
    backup.set_syncing(true);

    let config = Arc::new(proxy_config(&[
        ("primary", primary.url()),
        ("backup", backup.url()),
    ]));
    let balancer = Arc::new(LoadBalancer::new(config, Metrics::Disabled).unwrap());
    let checker = HealthChecker::new(Arc::clone(&balancer)).unwrap();

    let err = checker.startup_check().await.unwrap_err();
    assert!(matches!(err, StartupError::NoHealthyNodes { total: 2 }));
    assert!(balancer.healthy_snapshot().is_empty());
}

#[tokio::test]
async fn startup_excludes_syncing_backup_until_it_recovers() {
    let primary = MockBeacon::spawn(200, r#"{"data":{}}"#).await;
    let backup = MockBeacon::spawn(200, r#"{"data":{}}"#).await;
    backup.set_syncing(true);

    let config = proxy_config(&[("primary", primary.url()), ("backup", backup.url())]);
    let proxy = spawn_proxy(config).await;

    let healthy = proxy.balancer.healthy_snapshot();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].name(), "primary");

    // Once the backup catches up, the next periodic pass re-admits it.
    backup.set_syncing(false);
    proxy.checker.run_once().await;

    let healthy = proxy.balancer.healthy_snapshot();
    assert_eq!(healthy.len(), 2);
    assert_eq!(healthy[0].name(), "primary");
    assert_eq!(healthy[1].name(), "backup");
}

#[tokio::test]
async fn periodic_pass_evicts_syncing_backup() {
    let primary = MockBeacon::spawn(200, r#"{"data":{}}"#).await;
    let backup = MockBeacon::spawn(200, r#"{"data":{}}"#).await;

    let config = proxy_config(&[("primary", primary.url()), ("backup", backup.url())]);
    let proxy = spawn_proxy(config).await;
    assert_eq!(proxy.balancer.healthy_snapshot().len(), 2);

    let backup_node = proxy.balancer.nodes()[1].clone();
    backup_node.increment_success();

    backup.set_syncing(true);
    proxy.checker.run_once().await;

    let healthy = proxy.balancer.healthy_snapshot();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].name(), "primary");
    // A failed probe wipes the success streak.
    assert_eq!(backup_node.consecutive_successes(), 0);
}

#[tokio::test]
async fn demote_recover_failback_cycle() {
    let primary = MockBeacon::spawn(500, r#"{"error":"boom"}"#).await;
    let backup = MockBeacon::spawn(200, r#"{"data":{"head_slot":"67890"}}"#).await;

    let mut config = proxy_config(&[("primary", primary.url()), ("backup", backup.url())]);
    config.failover.error_threshold = 1;
    config.server.max_retries = 1;
    config.healthcheck.successful_checks_for_failback = 3;

    let proxy = spawn_proxy(config).await;
    let client = reqwest::Client::new();
    let primary_node = proxy.balancer.nodes()[0].clone();
    let backup_node = proxy.balancer.nodes()[1].clone();

    // One 5xx crosses the threshold of one: primary demoted to priority N.
    primary.set_syncing(true);
    let response = client
        .get(format!("{}{}", proxy.url(), HEAD_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(primary_node.priority(), 2);

    // No primary remains; the next pass promotes the healthy backup.
    proxy.checker.run_once().await;
    assert!(backup_node.is_primary());
    let healthy = proxy.balancer.healthy_snapshot();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].name(), "backup");

    // The old primary recovers and proves itself over three ticks.
    primary.set_syncing(false);
    primary.set_response(200, r#"{"data":{"head_slot":"12345"}}"#);

    proxy.checker.run_once().await;
    assert!(!primary_node.is_primary(), "one success must not fail back yet");
    proxy.checker.run_once().await;
    assert!(!primary_node.is_primary(), "two successes must not fail back yet");
    proxy.checker.run_once().await;

    // Third consecutive success restores the original roles.
    assert!(primary_node.is_primary());
    assert_eq!(backup_node.priority(), backup_node.original_priority());

    // One more pass re-probes the ex-interim-primary back into the set.
    proxy.checker.run_once().await;
    let healthy = proxy.balancer.healthy_snapshot();
    assert_eq!(healthy.len(), 2);
    assert_eq!(healthy[0].name(), "primary");

    // Traffic follows the restored primary.
    let response = client
        .get(format!("{}{}", proxy.url(), HEAD_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("12345"));
}

#[tokio::test]
async fn demoted_node_is_probed_again_via_priority_gate() {
    let primary = MockBeacon::spawn(500, r#"{"error":"boom"}"#).await;
    let backup = MockBeacon::spawn(200, r#"{"data":{}}"#).await;

    let mut config = proxy_config(&[("primary", primary.url()), ("backup", backup.url())]);
    config.failover.error_threshold = 1;
    config.server.max_retries = 1;

    let proxy = spawn_proxy(config).await;
    let client = reqwest::Client::new();
    let primary_node = proxy.balancer.nodes()[0].clone();

    let _ = client
        .get(format!("{}{}", proxy.url(), HEAD_PATH))
        .send()
        .await
        .unwrap();
    assert_eq!(primary_node.priority(), 2);
    let checks_before = primary_node.last_check();

    // Demotion put it at priority N > 0, which is exactly what the
    // periodic pass selects on, so it is probed despite being outside the
    // healthy set.
    proxy.checker.run_once().await;
    assert!(primary_node.last_check() > checks_before);

    // Its syncing endpoint still answers healthily and no other node holds
    // priority 0, so promotion hands it straight back: the failback
    // threshold only gates the swap when another primary is serving.
    let healthy = proxy.balancer.healthy_snapshot();
    assert!(healthy.iter().any(|n| Arc::ptr_eq(n, &primary_node)));
    assert!(primary_node.is_primary());
}
