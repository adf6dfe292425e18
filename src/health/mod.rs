//! Health probing and the check scheduler.

pub mod checker;
pub mod prober;

pub use checker::{HealthChecker, StartupError};
pub use prober::{probe, ProbeFailure, SyncingResponse};
