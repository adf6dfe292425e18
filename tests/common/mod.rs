//! Shared fixtures: programmable mock beacon nodes and a proxy harness.

// Each integration test binary compiles this module separately and uses a
// different subset of the helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;

use beacon_proxy::config::{Config, NodeEntry};
use beacon_proxy::observability::metrics::Metrics;
use beacon_proxy::{server, HealthChecker, LoadBalancer};

/// Behaviour knobs for one mock beacon node.
pub struct MockState {
    status: AtomicU16,
    body: Mutex<String>,
    syncing: AtomicBool,
    delay_ms: AtomicU64,
    api_hits: AtomicUsize,
    serve_events_ws: AtomicBool,
}

/// A mock beacon node: health endpoint, programmable API responses, and an
/// optional `/eth/v1/events` WebSocket echo that uppercases text frames.
#[derive(Clone)]
pub struct MockBeacon {
    pub addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockBeacon {
    pub async fn spawn(status: u16, body: &str) -> Self {
        let state = Arc::new(MockState {
            status: AtomicU16::new(status),
            body: Mutex::new(body.to_string()),
            syncing: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            api_hits: AtomicUsize::new(0),
            serve_events_ws: AtomicBool::new(true),
        });

        let app = Router::new()
            .route("/eth/v1/node/syncing", any(syncing_handler))
            .route("/eth/v1/events", any(events_handler))
            .fallback(api_handler)
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_response(&self, status: u16, body: &str) {
        self.state.status.store(status, Ordering::SeqCst);
        *self.state.body.lock().unwrap() = body.to_string();
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.state.syncing.store(syncing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Disable the WebSocket echo so upgrade dials against this node fail.
    pub fn disable_events_ws(&self) {
        self.state.serve_events_ws.store(false, Ordering::SeqCst);
    }

    /// Number of proxied API requests served (probes excluded).
    pub fn api_hits(&self) -> usize {
        self.state.api_hits.load(Ordering::SeqCst)
    }
}

async fn syncing_handler(State(state): State<Arc<MockState>>) -> Response {
    let body = if state.syncing.load(Ordering::SeqCst) {
        r#"{"data":{"is_syncing":true,"sync_distance":"512"}}"#
    } else {
        r#"{"data":{"is_syncing":false,"sync_distance":"0"}}"#
    };
    ([(axum::http::header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn events_handler(State(state): State<Arc<MockState>>, ws: WebSocketUpgrade) -> Response {
    if !state.serve_events_ws.load(Ordering::SeqCst) {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }
    ws.on_upgrade(|mut socket| async move {
        while let Some(Ok(message)) = socket.recv().await {
            let reply = match message {
                // "bye" simulates an upstream that hangs up abruptly.
                Message::Text(text) if text.as_str() == "bye" => break,
                Message::Text(text) => Message::Text(text.as_str().to_uppercase().into()),
                Message::Binary(data) => Message::Binary(data),
                Message::Close(_) => break,
                _ => continue,
            };
            if socket.send(reply).await.is_err() {
                break;
            }
        }
    })
}

async fn api_handler(State(state): State<Arc<MockState>>, _request: Request<Body>) -> Response {
    state.api_hits.fetch_add(1, Ordering::SeqCst);

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status =
        StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    let body = state.body.lock().unwrap().clone();
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// A proxy wired to mock beacons, listening on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub balancer: Arc<LoadBalancer>,
    pub checker: Arc<HealthChecker>,
}

impl TestProxy {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

/// Base configuration for a proxy fronting `nodes` (name, url) pairs.
pub fn proxy_config(nodes: &[(&str, String)]) -> Config {
    let mut config = Config::default();
    for (name, url) in nodes {
        config.beacons.nodes.push(name.to_string());
        config.beacons.entries.insert(
            name.to_string(),
            NodeEntry {
                url: url.clone(),
                kind: None,
            },
        );
    }
    config
}

/// Run the startup health check and serve the proxy on an ephemeral port.
///
/// Panics when the startup check fails; tests for that path construct the
/// checker directly.
pub async fn spawn_proxy(config: Config) -> TestProxy {
    let config = Arc::new(config);
    let balancer =
        Arc::new(LoadBalancer::new(Arc::clone(&config), Metrics::Disabled).expect("balancer"));
    let checker = Arc::new(HealthChecker::new(Arc::clone(&balancer)).expect("checker"));
    checker.startup_check().await.expect("startup health check");

    let router = server::build_router(Arc::clone(&balancer), None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestProxy {
        addr,
        balancer,
        checker,
    }
}
