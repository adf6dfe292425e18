//! Failover reverse proxy for Ethereum Beacon Chain API endpoints.
//!
//! The proxy fronts a set of beacon nodes (Lighthouse, Prysm, Nimbus, Teku,
//! hosted providers) and presents them to clients as a single upstream. Each
//! request is routed to exactly one live backend, in strict priority order:
//! the first configured node is the primary and serves all traffic, the rest
//! are backups that absorb failures.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client ──▶ server (axum) ──▶ balancer::http ──▶ node proxy ──▶ beacon node
//!                │                    │
//!                │  WS upgrade        ├── healthy set (priority order)
//!                └──▶ balancer::websocket
//!
//!  health::checker ── startup probe (all nodes, concurrent)
//!                  └─ periodic probe (backups only) ──▶ demote / promote / failback
//! ```
//!
//! Health is tracked two ways: the primary is validated on the serving path
//! (consecutive 5xx demote it), while backups are probed periodically against
//! `/eth/v1/node/syncing` since they receive no organic traffic.

// Core subsystems
pub mod balancer;
pub mod config;
pub mod node;
pub mod server;

// Health monitoring
pub mod health;

// Cross-cutting concerns
pub mod observability;
pub mod security;
pub mod validator;

pub use balancer::LoadBalancer;
pub use config::Config;
pub use health::HealthChecker;
pub use observability::metrics::Metrics;
