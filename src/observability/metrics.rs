//! Metrics facade.
//!
//! A tagged capability over the `metrics` recorder: either disabled (every
//! call is a no-op) or backed by a Prometheus recorder whose exposition is
//! rendered by the `/metrics` endpoint. Metric names keep the original
//! dotted form; the exporter sanitizes them for Prometheus.

use std::sync::Arc;
use std::time::Duration;

use metrics::Label;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Label set passed alongside a metric name.
pub type Labels<'a> = &'a [(&'static str, String)];

/// Metrics capability: disabled, or a namespaced Prometheus recorder.
#[derive(Clone)]
pub enum Metrics {
    Disabled,
    Prometheus {
        namespace: Arc<str>,
        handle: PrometheusHandle,
    },
}

impl Metrics {
    /// Build the capability from configuration. Installs the global
    /// Prometheus recorder when enabled, so this must run once per process.
    pub fn new(config: &MetricsConfig) -> Result<Self, BuildError> {
        if !config.enabled {
            tracing::info!("metrics collection disabled");
            return Ok(Self::Disabled);
        }

        let handle = PrometheusBuilder::new().install_recorder()?;
        tracing::info!(namespace = %config.namespace, "metrics collection enabled (Prometheus)");

        Ok(Self::Prometheus {
            namespace: Arc::from(config.namespace.as_str()),
            handle,
        })
    }

    /// Increment a counter by one.
    pub fn incr(&self, name: &str, labels: Labels<'_>) {
        if let Self::Prometheus { namespace, .. } = self {
            metrics::counter!(format!("{namespace}.{name}"), to_labels(labels)).increment(1);
        }
    }

    /// Set a gauge to an absolute value.
    pub fn gauge(&self, name: &str, value: f64, labels: Labels<'_>) {
        if let Self::Prometheus { namespace, .. } = self {
            metrics::gauge!(format!("{namespace}.{name}"), to_labels(labels)).set(value);
        }
    }

    /// Record a duration observation.
    pub fn timing(&self, name: &str, value: Duration, labels: Labels<'_>) {
        if let Self::Prometheus { namespace, .. } = self {
            metrics::histogram!(format!("{namespace}.{name}"), to_labels(labels))
                .record(value.as_secs_f64());
        }
    }

    /// Render the Prometheus exposition, or an empty document when disabled.
    pub fn render(&self) -> String {
        match self {
            Self::Disabled => String::new(),
            Self::Prometheus { handle, .. } => handle.render(),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("Metrics::Disabled"),
            Self::Prometheus { namespace, .. } => f
                .debug_struct("Metrics::Prometheus")
                .field("namespace", namespace)
                .finish(),
        }
    }
}

fn to_labels(labels: Labels<'_>) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}
