//! Configuration validation logic.

use std::fmt;

use crate::config::schema::Config;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error: {}", self.0)
    }
}

/// Validate a [`Config`] for semantic correctness.
///
/// Collects every problem rather than stopping at the first, so a broken
/// deployment surfaces all its mistakes in one startup failure.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.beacons.nodes.is_empty() {
        errors.push(ValidationError(
            "at least one beacon node must be configured in the [beacons] section".to_string(),
        ));
    }

    for name in &config.beacons.nodes {
        match config.beacons.entries.get(name) {
            None => errors.push(ValidationError(format!(
                "beacon '{name}' is listed in nodes but has no [beacons.{name}] table"
            ))),
            Some(entry) if entry.url.is_empty() => {
                errors.push(ValidationError(format!("beacon '{name}': url is required")));
            }
            Some(_) => {}
        }
    }

    if config.server.port == 0 {
        errors.push(ValidationError("server port must be non-zero".to_string()));
    }

    if config.server.max_retries < 1 {
        errors.push(ValidationError("max_retries must be at least 1".to_string()));
    }

    if config.server.request_timeout_ms == 0 {
        errors.push(ValidationError("request_timeout_ms must be positive".to_string()));
    }

    if config.failover.error_threshold < 1 {
        errors.push(ValidationError(
            "failover error_threshold must be at least 1".to_string(),
        ));
    }

    if config.healthcheck.interval_secs == 0 {
        errors.push(ValidationError("health check interval must be positive".to_string()));
    }
    if config.healthcheck.timeout_secs == 0 {
        errors.push(ValidationError("health check timeout must be positive".to_string()));
    }
    if config.healthcheck.timeout_secs >= config.healthcheck.interval_secs {
        errors.push(ValidationError(
            "health check timeout must be less than interval".to_string(),
        ));
    }
    if config.healthcheck.successful_checks_for_failback < 1 {
        errors.push(ValidationError(
            "successful_checks_for_failback must be at least 1".to_string(),
        ));
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logger.level.as_str()) {
        errors.push(ValidationError(format!(
            "invalid logger level: {} (must be one of trace, debug, info, warn, error)",
            config.logger.level
        )));
    }
    if !["json", "text"].contains(&config.logger.format.as_str()) {
        errors.push(ValidationError(format!(
            "invalid logger format: {} (must be json or text)",
            config.logger.format
        )));
    }
    if !["stdout", "stderr"].contains(&config.logger.output.as_str()) {
        errors.push(ValidationError(format!(
            "invalid logger output: {} (must be stdout or stderr)",
            config.logger.output
        )));
    }

    if config.ratelimit.enabled {
        if config.ratelimit.requests_per_second < 1 {
            errors.push(ValidationError(
                "rate limit requests_per_second must be at least 1".to_string(),
            ));
        }
        if config.ratelimit.window_secs == 0 {
            errors.push(ValidationError("rate limit window must be positive".to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
