//! Health-check scheduling and priority transitions.
//!
//! Two probe modes share one prober:
//!
//! - **Startup**: every node, concurrently; the process refuses to start
//!   when none are healthy.
//! - **Periodic**: backups only (`priority > 0`). The primary is validated
//!   by organic traffic on the serving path, so probing it again would
//!   double its load and invite spurious transitions; backups see no
//!   traffic and must be probed.
//!
//! After each periodic pass the transition block runs under the healthy-set
//! write lock, in a fixed order: failback, then priority restoration, then
//! rebuild with promotion. Failback must precede restoration or the sweep
//! would undo the demotion failback just performed.

use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::balancer::LoadBalancer;
use crate::health::prober::{self, ProbeFailure};
use crate::node::BeaconNode;

/// Error type for the startup probe.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("startup health check failed: no healthy nodes available (total nodes: {total})")]
    NoHealthyNodes { total: usize },

    #[error("failed to build probe client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Drives startup and periodic health checks against the balancer's nodes.
pub struct HealthChecker {
    balancer: Arc<LoadBalancer>,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(balancer: Arc<LoadBalancer>) -> Result<Self, StartupError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { balancer, client })
    }

    /// Probe every configured node concurrently and seed the healthy set.
    ///
    /// Fails when no node is healthy; unhealthy nodes stay configured but
    /// start outside the healthy set.
    pub async fn startup_check(&self) -> Result<(), StartupError> {
        tracing::info!("performing startup health checks on all beacon nodes");

        let results = self.probe_nodes(self.balancer.nodes().to_vec()).await;

        let mut healthy = Vec::new();
        let mut unhealthy_names = Vec::new();
        for (node, result) in results {
            match result {
                Ok(()) => {
                    tracing::info!(node_name = %node.name(), "node is healthy and synced");
                    healthy.push(node);
                }
                Err(error) => {
                    tracing::warn!(
                        node_name = %node.name(),
                        reason = error.reason(),
                        %error,
                        "node is not healthy or not synced"
                    );
                    unhealthy_names.push(node.name().to_string());
                }
            }
        }

        healthy.sort_by_key(|node| node.priority());

        tracing::info!(
            total_nodes = self.balancer.nodes().len(),
            healthy_nodes = healthy.len(),
            unhealthy_nodes = unhealthy_names.len(),
            "startup health check completed"
        );

        if healthy.is_empty() {
            return Err(StartupError::NoHealthyNodes {
                total: self.balancer.nodes().len(),
            });
        }

        if !unhealthy_names.is_empty() {
            tracing::warn!(
                unhealthy_node_names = ?unhealthy_names,
                healthy_count = healthy.len(),
                "some nodes are unhealthy at startup"
            );
        }

        self.balancer.set_healthy(healthy);
        Ok(())
    }

    /// Spawn the periodic check loop on its own task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let checker = Arc::clone(self);
        let interval = self.balancer.config().healthcheck.interval();

        tracing::info!(interval_secs = interval.as_secs(), "started periodic health check routine");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately; the
            // startup probe already covered that moment.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                checker.run_once().await;
            }
        })
    }

    /// One periodic pass: probe all backups, update counters, and apply the
    /// priority transitions.
    pub async fn run_once(&self) {
        let backups: Vec<_> = self
            .balancer
            .nodes()
            .iter()
            .filter(|node| node.is_backup())
            .cloned()
            .collect();

        if backups.is_empty() {
            tracing::debug!("no backup nodes to health check");
            return;
        }

        tracing::debug!(count = backups.len(), "performing periodic health check on backup nodes");

        let results = self.probe_nodes(backups).await;

        let metrics = self.balancer.metrics();
        let mut healthy_backups = Vec::new();
        let mut unhealthy_count = 0usize;

        for (node, result) in results {
            match result {
                Ok(()) => {
                    node.increment_success();
                    node.reset_errors();
                    metrics.incr(
                        "healthcheck.success",
                        &[("node", node.name().to_string())],
                    );
                    healthy_backups.push(node);
                }
                Err(failure) => {
                    node.reset_successes();
                    unhealthy_count += 1;
                    tracing::warn!(
                        node_name = %node.name(),
                        reason = failure.reason(),
                        error = %failure,
                        "periodic health check failed"
                    );
                    record_failure_metric(metrics, node.name(), &failure);
                }
            }
        }

        self.apply_transitions(&healthy_backups);

        tracing::debug!(
            backup_nodes_checked = healthy_backups.len() + unhealthy_count,
            healthy_backups = healthy_backups.len(),
            unhealthy_backups = unhealthy_count,
            "periodic health check completed"
        );

        metrics.gauge(
            "loadbalancer.healthy_backup_nodes",
            healthy_backups.len() as f64,
            &[],
        );
        metrics.gauge(
            "loadbalancer.unhealthy_backup_nodes",
            unhealthy_count as f64,
            &[],
        );
    }

    async fn probe_nodes(
        &self,
        nodes: Vec<Arc<BeaconNode>>,
    ) -> Vec<(Arc<BeaconNode>, Result<(), ProbeFailure>)> {
        let timeout = self.balancer.config().healthcheck.timeout();
        let probes = nodes.into_iter().map(|node| {
            let client = self.client.clone();
            async move {
                let result = prober::probe(&client, node.url(), timeout).await;
                node.touch_last_check();
                (node, result)
            }
        });
        join_all(probes).await
    }

    /// The ordered transition block, atomic with respect to readers.
    fn apply_transitions(&self, healthy_backups: &[Arc<BeaconNode>]) {
        let balancer = &self.balancer;
        let metrics = balancer.metrics();
        let failback_after = u64::from(
            balancer
                .config()
                .healthcheck
                .successful_checks_for_failback,
        );

        let mut healthy = balancer.healthy_write();

        // 1. Failback: restore the original primary once it has proven
        // itself over enough consecutive probes.
        if let Some(original) = healthy_backups
            .iter()
            .find(|node| node.original_priority() == 0)
        {
            let consecutive_successes = original.consecutive_successes();
            if consecutive_successes >= failback_after {
                tracing::info!(
                    node_name = %original.name(),
                    consecutive_successes,
                    required = failback_after,
                    "original primary ready for failback"
                );

                if let Some(current) = balancer.current_primary().cloned() {
                    if !Arc::ptr_eq(&current, original) {
                        original.set_priority(0);
                        original.reset_errors();
                        tracing::info!(
                            node_name = %original.name(),
                            "failback: restoring original primary node"
                        );

                        current.set_priority(current.original_priority());
                        tracing::info!(
                            node_name = %current.name(),
                            restored_priority = current.original_priority(),
                            "failback: demoting temporary primary to original priority"
                        );

                        metrics.incr(
                            "node.failback_to_original_primary",
                            &[("node", original.name().to_string())],
                        );
                    }
                }
            }
        }

        // 2. Restore priorities clobbered by earlier demotions. The original
        // primary only re-earns priority 0 through failback above, so it is
        // excluded here.
        for node in healthy_backups {
            if node.original_priority() == 0 {
                continue;
            }
            if node.priority() != node.original_priority() {
                tracing::debug!(
                    node_name = %node.name(),
                    current_priority = node.priority(),
                    original_priority = node.original_priority(),
                    "restoring node to original priority"
                );
                node.set_priority(node.original_priority());
            }
        }

        // 3. Rebuild the healthy set: keep the current primary if it was
        // already healthy, or promote a backup when no primary remains.
        let mut updated: Vec<Arc<BeaconNode>> = Vec::new();

        match balancer.current_primary() {
            Some(primary) => {
                if healthy.iter().any(|node| Arc::ptr_eq(node, primary)) {
                    updated.push(Arc::clone(primary));
                }
            }
            None => {
                let candidate = healthy_backups
                    .iter()
                    .find(|node| node.original_priority() == 0)
                    .or_else(|| {
                        healthy_backups
                            .iter()
                            .filter(|node| node.priority() > 0)
                            .min_by_key(|node| node.priority())
                    });

                if let Some(node) = candidate {
                    let previous_priority = node.priority();
                    node.set_priority(0);
                    node.reset_errors();
                    tracing::info!(
                        node_name = %node.name(),
                        previous_priority,
                        original_priority = node.original_priority(),
                        "backup node promoted to primary"
                    );
                    metrics.incr(
                        "node.backup_promoted",
                        &[("node", node.name().to_string())],
                    );
                    updated.push(Arc::clone(node));
                }
            }
        }

        for node in healthy_backups {
            if !updated.iter().any(|existing| Arc::ptr_eq(existing, node)) {
                updated.push(Arc::clone(node));
            }
        }
        updated.sort_by_key(|node| node.priority());

        *healthy = updated;
    }
}

fn record_failure_metric(
    metrics: &crate::observability::metrics::Metrics,
    node_name: &str,
    failure: &ProbeFailure,
) {
    match failure {
        ProbeFailure::IsSyncing {
            is_syncing,
            sync_distance,
        } => {
            metrics.incr(
                "healthcheck.not_synced",
                &[
                    ("node", node_name.to_string()),
                    ("reason", failure.reason().to_string()),
                    ("is_syncing", is_syncing.to_string()),
                    ("sync_distance", sync_distance.clone()),
                ],
            );
        }
        ProbeFailure::SyncDistanceNotZero { sync_distance } => {
            metrics.incr(
                "healthcheck.not_synced",
                &[
                    ("node", node_name.to_string()),
                    ("reason", failure.reason().to_string()),
                    ("is_syncing", "false".to_string()),
                    ("sync_distance", sync_distance.clone()),
                ],
            );
        }
        ProbeFailure::Non200Status { status } => {
            metrics.incr(
                "healthcheck.failed",
                &[
                    ("node", node_name.to_string()),
                    ("reason", failure.reason().to_string()),
                    ("status_code", status.to_string()),
                ],
            );
        }
        _ => {
            metrics.incr(
                "healthcheck.failed",
                &[
                    ("node", node_name.to_string()),
                    ("reason", failure.reason().to_string()),
                    ("status_code", String::new()),
                ],
            );
        }
    }
}
