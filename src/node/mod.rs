//! Beacon node descriptors.
//!
//! A [`BeaconNode`] carries one upstream's identity, its health counters,
//! and the pre-built outbound proxy used to forward requests to it. Counters
//! are plain atomics so the request path never takes a lock for them; the
//! mutable priority sits behind a read-write lock because failover moves it
//! together with healthy-set membership.

pub mod dns;
pub mod proxy;

pub use dns::CachingResolver;
pub use proxy::{NodeProxy, RecordedResponse};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use thiserror::Error;
use url::Url;

use crate::config::{Config, NodeConfig, NodeKind};

/// Error type for node construction.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid node URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client for '{name}': {source}")]
    ClientBuild {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A single beacon node with its proxy and health state.
#[derive(Debug)]
pub struct BeaconNode {
    name: String,
    url: Url,
    kind: Option<NodeKind>,
    proxy: NodeProxy,

    consecutive_errors: AtomicU64,
    consecutive_successes: AtomicU64,
    total_failures: AtomicU64,
    requests: AtomicU64,

    priority: RwLock<usize>,
    original_priority: usize,
    last_check: Mutex<Instant>,
}

impl BeaconNode {
    /// Create a beacon node from its configuration.
    ///
    /// `priority` is the node's position in the configured list; it doubles
    /// as the immutable original priority used for failback.
    pub fn new(
        node_config: &NodeConfig,
        config: &Config,
        resolver: Arc<CachingResolver>,
        priority: usize,
    ) -> Result<Self, NodeError> {
        let url = Url::parse(&node_config.url).map_err(|source| NodeError::InvalidUrl {
            url: node_config.url.clone(),
            source,
        })?;

        let proxy = NodeProxy::new(url.clone(), config, resolver).map_err(|source| {
            NodeError::ClientBuild {
                name: node_config.name.clone(),
                source,
            }
        })?;

        Ok(Self {
            name: node_config.name.clone(),
            url,
            kind: node_config.kind,
            proxy,
            consecutive_errors: AtomicU64::new(0),
            consecutive_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            priority: RwLock::new(priority),
            original_priority: priority,
            last_check: Mutex::new(Instant::now()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.kind
    }

    pub fn proxy(&self) -> &NodeProxy {
        &self.proxy
    }

    /// Whether the node is below the consecutive-error threshold.
    pub fn is_healthy(&self, error_threshold: u32) -> bool {
        self.consecutive_errors.load(Ordering::SeqCst) < u64::from(error_threshold)
    }

    /// Record a failed request: bumps consecutive and total errors, and
    /// clears the success streak.
    pub fn increment_error(&self) {
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst);
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
    }

    /// Record a successful periodic probe.
    pub fn increment_success(&self) {
        self.consecutive_successes.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset_errors(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
    }

    pub fn reset_successes(&self) {
        self.consecutive_successes.store(0, Ordering::SeqCst);
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn consecutive_successes(&self) -> u64 {
        self.consecutive_successes.load(Ordering::SeqCst)
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    /// Current counter snapshot: (consecutive errors, total failures, requests).
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.consecutive_errors.load(Ordering::SeqCst),
            self.total_failures.load(Ordering::SeqCst),
            self.requests.load(Ordering::SeqCst),
        )
    }

    pub fn set_priority(&self, priority: usize) {
        *self.priority.write().expect("priority lock poisoned") = priority;
    }

    pub fn priority(&self) -> usize {
        *self.priority.read().expect("priority lock poisoned")
    }

    /// The node's position in the configured list. Never changes; defines
    /// the failback target.
    pub fn original_priority(&self) -> usize {
        self.original_priority
    }

    pub fn is_primary(&self) -> bool {
        self.priority() == 0
    }

    pub fn is_backup(&self) -> bool {
        self.priority() > 0
    }

    /// Record that a probe completed, whatever its outcome.
    pub fn touch_last_check(&self) {
        *self.last_check.lock().expect("last_check lock poisoned") = Instant::now();
    }

    pub fn last_check(&self) -> Instant {
        *self.last_check.lock().expect("last_check lock poisoned")
    }
}
