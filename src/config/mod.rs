//! Proxy configuration: schema, loading, and validation.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BeaconsConfig, Config, DnsConfig, FailoverConfig, HealthCheckConfig, LoggerConfig,
    MetricsConfig, NodeConfig, NodeEntry, NodeKind, ProxyConfig, RateLimitConfig, ServerConfig,
    WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};
