//! Load balancer state: the configured nodes and the healthy set.
//!
//! The healthy set is the single source of truth for routing: an ordered
//! list of node references sorted ascending by current priority, guarded by
//! one read-write lock. Request handlers snapshot it; the health-check
//! scheduler and on-request demotion rewrite it.

pub mod http;
pub mod websocket;

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use thiserror::Error;

use crate::config::Config;
use crate::node::{BeaconNode, CachingResolver};
use crate::observability::metrics::Metrics;
use crate::validator::BeaconEndpointValidator;

/// Which entry point recorded an event; used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::WebSocket => "websocket",
        }
    }
}

/// Error type for load balancer construction.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("at least one beacon node is required")]
    NoNodesConfigured,

    #[error("no valid beacon nodes configured")]
    NoValidNodes,

    #[error("{0}")]
    NodeResolution(String),
}

/// Manages the beacon nodes and routes traffic across them.
pub struct LoadBalancer {
    nodes: Vec<Arc<BeaconNode>>,
    healthy: RwLock<Vec<Arc<BeaconNode>>>,
    validator: BeaconEndpointValidator,
    metrics: Metrics,
    config: Arc<Config>,
}

impl LoadBalancer {
    /// Build the balancer from configuration.
    ///
    /// The first configured node becomes the primary (priority 0), the rest
    /// backups in declaration order. Nodes with unusable URLs are logged and
    /// skipped; construction fails only when none survive.
    pub fn new(config: Arc<Config>, metrics: Metrics) -> Result<Self, BalancerError> {
        let node_configs = config
            .resolve_nodes()
            .map_err(BalancerError::NodeResolution)?;
        if node_configs.is_empty() {
            return Err(BalancerError::NoNodesConfigured);
        }

        let resolver = Arc::new(CachingResolver::new(config.dns.cache_ttl()));

        let mut nodes = Vec::with_capacity(node_configs.len());
        for (priority, node_config) in node_configs.iter().enumerate() {
            match BeaconNode::new(node_config, &config, Arc::clone(&resolver), priority) {
                Ok(node) => nodes.push(Arc::new(node)),
                Err(error) => {
                    tracing::error!(
                        name = %node_config.name,
                        url = %node_config.url,
                        %error,
                        "failed to create beacon node"
                    );
                }
            }
        }

        if nodes.is_empty() {
            return Err(BalancerError::NoValidNodes);
        }

        Ok(Self {
            nodes,
            healthy: RwLock::new(Vec::new()),
            validator: BeaconEndpointValidator::new(),
            metrics,
            config,
        })
    }

    /// All configured nodes, in declaration order.
    pub fn nodes(&self) -> &[Arc<BeaconNode>] {
        &self.nodes
    }

    /// Copy of the current healthy set, in priority order.
    pub fn healthy_snapshot(&self) -> Vec<Arc<BeaconNode>> {
        self.healthy.read().expect("healthy set lock poisoned").clone()
    }

    pub fn validator(&self) -> &BeaconEndpointValidator {
        &self.validator
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The node currently holding priority 0, if any.
    pub fn current_primary(&self) -> Option<&Arc<BeaconNode>> {
        self.nodes.iter().find(|node| node.is_primary())
    }

    pub(crate) fn set_healthy(&self, nodes: Vec<Arc<BeaconNode>>) {
        *self.healthy.write().expect("healthy set lock poisoned") = nodes;
    }

    pub(crate) fn healthy_write(&self) -> RwLockWriteGuard<'_, Vec<Arc<BeaconNode>>> {
        self.healthy.write().expect("healthy set lock poisoned")
    }

    /// Record a server-side failure against `node` and demote it when it is
    /// the primary and has crossed the error threshold.
    ///
    /// Demotion moves the node to priority `N` (the configured node count,
    /// beyond every original priority) so the periodic prober picks it up,
    /// and removes it from the healthy set. No promotion happens inline; the
    /// scheduler's next pass restores a primary.
    ///
    /// Returns whether a demotion took place.
    pub(crate) fn record_server_error(&self, node: &Arc<BeaconNode>, protocol: Protocol) -> bool {
        node.increment_error();
        let consecutive_errors = node.consecutive_errors();

        if !node.is_primary()
            || consecutive_errors < u64::from(self.config.failover.error_threshold)
        {
            return false;
        }

        tracing::warn!(
            node_name = %node.name(),
            node_url = %node.url(),
            consecutive_errors,
            threshold = self.config.failover.error_threshold,
            protocol = protocol.as_str(),
            "primary node failover triggered, demoting to backup priority"
        );

        let demoted_priority = self.nodes.len();
        {
            let mut healthy = self.healthy_write();
            node.set_priority(demoted_priority);
            healthy.retain(|candidate| !Arc::ptr_eq(candidate, node));
        }

        tracing::info!(
            node_name = %node.name(),
            new_priority = demoted_priority,
            "primary node demoted to backup"
        );
        self.metrics.incr(
            "node.primary_demoted",
            &[
                ("node", node.name().to_string()),
                ("protocol", protocol.as_str().to_string()),
            ],
        );

        true
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("nodes", &self.nodes.len())
            .field("healthy", &self.healthy_snapshot().len())
            .finish()
    }
}
