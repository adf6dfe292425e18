//! HTTP server: router construction and the listener loop.
//!
//! Three routes exist: `/healthz` for the proxy's own liveness, `/metrics`
//! for Prometheus exposition, and a fallback that sends everything else
//! through the endpoint validator into the routing engine (HTTP) or the
//! WebSocket proxier (upgrade requests).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::balancer::http::{canonical_response, INVALID_ENDPOINT_BODY};
use crate::balancer::{http as http_handler, websocket, LoadBalancer};
use crate::config::Config;
use crate::security::{rate_limit_middleware, RateLimiter};

/// Shared state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub balancer: Arc<LoadBalancer>,
}

/// Build the axum router with all middleware layers.
///
/// The rate limiter wraps only the proxy path; `/healthz` and `/metrics`
/// must stay reachable for monitoring even when a client is throttled.
pub fn build_router(balancer: Arc<LoadBalancer>, limiter: Option<Arc<RateLimiter>>) -> Router {
    let state = AppState { balancer };

    let management = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_exposition))
        .with_state(state.clone());

    let mut proxy = Router::new().fallback(proxy_handler).with_state(state);
    if let Some(limiter) = limiter {
        proxy = proxy.layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));
    }

    management.merge(proxy).layer(TraceLayer::new_for_http())
}

/// Bind the configured port and serve until ctrl-c.
pub async fn run(config: &Config, balancer: Arc<LoadBalancer>) -> std::io::Result<()> {
    let limiter = if config.ratelimit.enabled {
        tracing::info!(
            requests_per_second = config.ratelimit.requests_per_second,
            window_secs = config.ratelimit.window_secs,
            "rate limiting enabled"
        );
        Some(RateLimiter::new(&config.ratelimit))
    } else {
        None
    };

    let router = build_router(balancer, limiter);

    let listener = TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Route everything that is not a management endpoint.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let balancer = &state.balancer;
    let path = request.uri().path().to_string();
    let is_upgrade = is_websocket_upgrade(request.headers());

    if !balancer.validator().is_valid(&path) {
        let protocol = if is_upgrade { "websocket" } else { "http" };
        tracing::warn!(
            method = %request.method(),
            %path,
            protocol,
            "invalid beacon endpoint attempted"
        );
        balancer.metrics().incr(
            "request.invalid_endpoint",
            &[("protocol", protocol.to_string())],
        );
        return canonical_response(StatusCode::FORBIDDEN, INVALID_ENDPOINT_BODY);
    }

    if is_upgrade {
        let (mut parts, _) = request.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => websocket::handle(Arc::clone(balancer), upgrade, parts).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    http_handler::handle(Arc::clone(balancer), request).await
}

/// Standard upgrade detection: `Connection` lists `upgrade` and `Upgrade`
/// names `websocket`.
fn is_websocket_upgrade(headers: &header::HeaderMap) -> bool {
    let connection_requests_upgrade = headers.get_all(header::CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|tokens| {
                tokens
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
    });

    let upgrade_is_websocket = headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    connection_requests_upgrade && upgrade_is_websocket
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_exposition(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.balancer.metrics().render(),
    )
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
    tracing::info!("shutdown signal received");
}
