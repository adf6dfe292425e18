//! HTTP routing engine.
//!
//! One request, one backend: the healthy set is iterated in priority order
//! until an attempt succeeds, the retry cap is hit, or the overall deadline
//! runs out. Failed attempts never leak to the client; the response is
//! either a single backend's recorded reply or one of the canonical error
//! responses.

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::response::{IntoResponse, Response};
use http::{Request, StatusCode};

use crate::balancer::{LoadBalancer, Protocol};

/// Body sent with 403 rejections from the endpoint validator.
pub const INVALID_ENDPOINT_BODY: &str = "Invalid Beacon Chain API endpoint";

/// Body sent when every attempt failed.
pub const ALL_NODES_UNAVAILABLE_BODY: &str = "All beacon nodes unavailable";

/// Body sent when the overall request deadline elapsed.
pub const REQUEST_TIMEOUT_BODY: &str = "Request timeout";

pub(crate) fn canonical_response(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

/// Proxy one HTTP request across the healthy set.
pub async fn handle(balancer: Arc<LoadBalancer>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_timeout = balancer.config().server.request_timeout();
    let deadline = start + request_timeout;
    let max_retries = balancer.config().server.max_retries;
    let metrics = balancer.metrics().clone();

    let (parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    // Buffered once so every retry replays identical bytes.
    let body = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::warn!(%method, %path, %error, "failed to read request body");
            return canonical_response(StatusCode::BAD_REQUEST, "Failed to read request body");
        }
    };

    let healthy_nodes = balancer.healthy_snapshot();
    let mut last_status: Option<StatusCode> = None;

    for (attempt, node) in healthy_nodes.iter().enumerate() {
        if attempt >= max_retries {
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::warn!(
                %method,
                %path,
                duration_ms = start.elapsed().as_millis() as u64,
                timeout_ms = request_timeout.as_millis() as u64,
                node = %node.name(),
                "request timeout exceeded before attempting node"
            );
            return canonical_response(StatusCode::GATEWAY_TIMEOUT, REQUEST_TIMEOUT_BODY);
        }
        let remaining = deadline - now;

        node.increment_requests();
        let attempt_start = Instant::now();
        let outcome = node.proxy().forward(&parts, body.clone(), remaining).await;
        let attempt_duration = attempt_start.elapsed();

        match outcome {
            Ok(recorded) => {
                let status = recorded.status;
                last_status = Some(status);
                metrics.timing(
                    "request.attempt_duration",
                    attempt_duration,
                    &[
                        ("node", node.name().to_string()),
                        ("status_code", status.as_u16().to_string()),
                        ("attempt", (attempt + 1).to_string()),
                    ],
                );

                if recorded.is_success() {
                    node.reset_errors();
                    let total_duration = start.elapsed();
                    tracing::info!(
                        %method,
                        %path,
                        status = status.as_u16(),
                        duration_ms = total_duration.as_millis() as u64,
                        node = %node.name(),
                        "request served"
                    );
                    metrics.timing(
                        "request.duration",
                        total_duration,
                        &[
                            ("node", node.name().to_string()),
                            ("status_code", status.as_u16().to_string()),
                            ("result", "success".to_string()),
                        ],
                    );
                    metrics.incr("request.success", &[("node", node.name().to_string())]);
                    return recorded.into_response();
                }

                if recorded.is_server_error() {
                    balancer.record_server_error(node, Protocol::Http);
                } else {
                    // 4xx is almost certainly the client's fault, not the
                    // backend's; never held against the node.
                    tracing::warn!(
                        node_name = %node.name(),
                        node_url = %node.url(),
                        %method,
                        %path,
                        status = status.as_u16(),
                        attempt = attempt + 1,
                        "client error from beacon node"
                    );
                }
            }
            Err(error) if error.is_timeout() && Instant::now() >= deadline => {
                // The attempt budget is the remaining overall budget, so a
                // timeout at the deadline means the request budget is spent.
                // A timeout before the deadline (response-header wait) falls
                // through to the transport-failure arm instead.
                tracing::warn!(
                    %method,
                    %path,
                    node = %node.name(),
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "upstream attempt cancelled by request deadline"
                );
                metrics.timing(
                    "request.attempt_duration",
                    attempt_duration,
                    &[
                        ("node", node.name().to_string()),
                        ("status_code", "504".to_string()),
                        ("attempt", (attempt + 1).to_string()),
                    ],
                );
                return canonical_response(StatusCode::GATEWAY_TIMEOUT, REQUEST_TIMEOUT_BODY);
            }
            Err(error) => {
                // Dial and transport failures count like a 502 from the
                // node itself.
                last_status = Some(StatusCode::BAD_GATEWAY);
                tracing::warn!(
                    node_name = %node.name(),
                    %method,
                    %path,
                    %error,
                    attempt = attempt + 1,
                    "upstream request failed"
                );
                metrics.timing(
                    "request.attempt_duration",
                    attempt_duration,
                    &[
                        ("node", node.name().to_string()),
                        ("status_code", "502".to_string()),
                        ("attempt", (attempt + 1).to_string()),
                    ],
                );
                balancer.record_server_error(node, Protocol::Http);
            }
        }

        metrics.incr(
            "request.failover",
            &[
                ("from_node", node.name().to_string()),
                (
                    "status_code",
                    last_status.map(|s| s.as_u16().to_string()).unwrap_or_default(),
                ),
            ],
        );
    }

    let total_duration = start.elapsed();
    tracing::error!(
        %method,
        %path,
        duration_ms = total_duration.as_millis() as u64,
        last_status = last_status.map(|s| s.as_u16()).unwrap_or(0),
        attempts = healthy_nodes.len().min(max_retries),
        max_retries,
        "all beacon nodes failed"
    );
    metrics.timing(
        "request.duration",
        total_duration,
        &[
            ("node", "all".to_string()),
            (
                "status_code",
                last_status.map(|s| s.as_u16().to_string()).unwrap_or_default(),
            ),
            ("result", "failure".to_string()),
        ],
    );
    metrics.incr("request.failure", &[]);

    canonical_response(StatusCode::BAD_GATEWAY, ALL_NODES_UNAVAILABLE_BODY)
}
