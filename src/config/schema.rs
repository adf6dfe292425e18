//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML. Duration
//! options are numeric fields with a unit suffix (`_secs`, or `_ms` for the
//! fine-grained request deadline) and expose `Duration` accessors.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the beacon proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener and request-budget settings.
    pub server: ServerConfig,

    /// Beacon node definitions, in priority order.
    pub beacons: BeaconsConfig,

    /// Primary demotion settings.
    pub failover: FailoverConfig,

    /// Health probe scheduling.
    pub healthcheck: HealthCheckConfig,

    /// Prometheus metrics settings.
    pub metrics: MetricsConfig,

    /// Structured logging settings.
    pub logger: LoggerConfig,

    /// Per-IP rate limiting.
    pub ratelimit: RateLimitConfig,

    /// Outbound DNS caching.
    pub dns: DnsConfig,

    /// Outbound transport tuning.
    pub proxy: ProxyConfig,

    /// WebSocket frame buffers.
    pub websocket: WebSocketConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,

    /// Socket read timeout in seconds.
    pub read_timeout_secs: u64,

    /// Socket write timeout in seconds.
    pub write_timeout_secs: u64,

    /// Maximum attempts per request across the healthy set.
    pub max_retries: usize,

    /// Overall per-request deadline in milliseconds.
    pub request_timeout_ms: u64,

    /// Idle connection timeout in seconds.
    pub idle_timeout_secs: u64,

    /// Header read timeout in seconds.
    pub read_header_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            max_retries: 3,
            request_timeout_ms: 30_000,
            idle_timeout_secs: 90,
            read_header_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Overall per-request deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Recognised beacon client implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Lighthouse,
    Prysm,
    Nimbus,
    Teku,
    Erigon,
    Infura,
    Alchemy,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lighthouse => "lighthouse",
            Self::Prysm => "prysm",
            Self::Nimbus => "nimbus",
            Self::Teku => "teku",
            Self::Erigon => "erigon",
            Self::Infura => "infura",
            Self::Alchemy => "alchemy",
        };
        f.write_str(s)
    }
}

/// A single `[beacons.<name>]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeEntry {
    /// Base URL of the beacon API.
    pub url: String,

    /// Optional client implementation tag.
    #[serde(rename = "type")]
    pub kind: Option<NodeKind>,
}

/// The `[beacons]` section: an ordered name list plus one table per node.
///
/// The first name in `nodes` is the original primary; the rest are backups
/// in declaration order.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct BeaconsConfig {
    /// Beacon names in priority order.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Per-node configuration tables, keyed by name.
    #[serde(flatten)]
    pub entries: BTreeMap<String, NodeEntry>,
}

/// A resolved beacon node: name, URL, and optional client tag.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub url: String,
    pub kind: Option<NodeKind>,
}

impl Config {
    /// Resolve the ordered node list from the `[beacons]` section.
    ///
    /// Fails when a name in `nodes` has no matching `[beacons.<name>]` table.
    pub fn resolve_nodes(&self) -> Result<Vec<NodeConfig>, String> {
        let mut resolved = Vec::with_capacity(self.beacons.nodes.len());
        for name in &self.beacons.nodes {
            let entry = self
                .beacons
                .entries
                .get(name)
                .ok_or_else(|| format!("beacon configuration not found for: {name}"))?;
            resolved.push(NodeConfig {
                name: name.clone(),
                url: entry.url.clone(),
                kind: entry.kind,
            });
        }
        Ok(resolved)
    }
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Consecutive server errors before the primary is demoted.
    pub error_threshold: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { error_threshold: 5 }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Periodic probe interval in seconds.
    pub interval_secs: u64,

    /// Per-probe timeout in seconds. Must be less than the interval.
    pub timeout_secs: u64,

    /// Consecutive successful probes before the original primary is
    /// restored to priority 0.
    pub successful_checks_for_failback: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 5,
            successful_checks_for_failback: 3,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus recorder and `/metrics` exposition.
    pub enabled: bool,

    /// Prefix applied to every metric name.
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: "beacon_proxy".to_string(),
        }
    }
}

/// Logger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,

    /// Output format: "json" or "text".
    pub format: String,

    /// Output destination: "stdout" or "stderr".
    pub output: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "stdout".to_string(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable per-IP rate limiting.
    pub enabled: bool,

    /// Maximum requests per window per client IP.
    pub requests_per_second: u32,

    /// Sliding window length in seconds.
    pub window_secs: u64,

    /// Interval between idle-client sweeps in seconds.
    pub cleanup_interval_secs: u64,

    /// Idle time after which a client bucket is dropped, in seconds.
    pub client_expiry_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            window_secs: 60,
            cleanup_interval_secs: 300,
            client_expiry_secs: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn client_expiry(&self) -> Duration {
        Duration::from_secs(self.client_expiry_secs)
    }
}

/// DNS caching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Cached resolution lifetime in seconds.
    pub cache_ttl_secs: u64,

    /// Outbound dial timeout in seconds.
    pub connection_timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            connection_timeout_secs: 10,
        }
    }
}

impl DnsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

/// Outbound transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// User-Agent set on forwarded requests that carry none.
    pub user_agent: String,

    /// Total idle connection cap across all hosts.
    pub max_idle_connections: usize,

    /// Idle connection lifetime in seconds.
    pub idle_connection_timeout_secs: u64,

    /// Idle connection cap per host.
    pub max_idle_connections_per_host: usize,

    /// Total connection cap per host.
    pub max_connections_per_host: usize,

    /// Time to wait for response headers, in seconds.
    pub response_header_timeout_secs: u64,

    /// TLS handshake timeout in seconds.
    pub tls_handshake_timeout_secs: u64,

    /// Expect-continue timeout in seconds.
    pub expect_continue_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            user_agent: "beacon-proxy/0.1".to_string(),
            max_idle_connections: 100,
            idle_connection_timeout_secs: 90,
            max_idle_connections_per_host: 10,
            max_connections_per_host: 100,
            response_header_timeout_secs: 10,
            tls_handshake_timeout_secs: 10,
            expect_continue_timeout_secs: 1,
        }
    }
}

impl ProxyConfig {
    pub fn idle_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_connection_timeout_secs)
    }

    pub fn response_header_timeout(&self) -> Duration {
        Duration::from_secs(self.response_header_timeout_secs)
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Read buffer size in bytes.
    pub read_buffer_size: usize,

    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            write_buffer_size: 4096,
        }
    }
}
