//! WebSocket proxying with dial failover.
//!
//! The upstream connection is established first, walking the healthy set in
//! priority order, so a client is only upgraded once a backend has accepted.
//! After that, two unidirectional pumps shuttle frames until either side
//! errors or closes; the first error published to a depth-2 channel tears
//! both pumps down. No cross-pump synchronisation beyond that channel.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use http::header::{
    HeaderMap, CONNECTION, HOST, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{request, Method, StatusCode};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::protocol::{
    CloseFrame as UpstreamCloseFrame, Message as UpstreamMessage, WebSocketConfig,
};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::balancer::http::canonical_response;
use crate::balancer::{LoadBalancer, Protocol};
use crate::node::proxy::join_path;
use crate::node::BeaconNode;
use crate::observability::metrics::Metrics;

/// Body sent when the healthy set is empty.
pub const NO_HEALTHY_NODES_BODY: &str = "No healthy beacon nodes available";

/// Body sent when no backend accepted the upstream dial.
pub const CONNECT_FAILED_BODY: &str = "Failed to establish WebSocket connection to any node";

type UpstreamWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers the proxy regenerates for the upstream dial instead of
/// forwarding from the client.
const HANDSHAKE_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-protocol",
];

/// Proxy a WebSocket upgrade across the healthy set.
pub async fn handle(
    balancer: Arc<LoadBalancer>,
    ws: WebSocketUpgrade,
    parts: request::Parts,
) -> Response {
    let healthy_nodes = balancer.healthy_snapshot();
    if healthy_nodes.is_empty() {
        return canonical_response(StatusCode::BAD_GATEWAY, NO_HEALTHY_NODES_BODY);
    }

    let ws_settings = &balancer.config().websocket;
    let upstream_config = WebSocketConfig::default()
        .read_buffer_size(ws_settings.read_buffer_size)
        .write_buffer_size(ws_settings.write_buffer_size);

    for node in &healthy_nodes {
        let upstream_url = match upstream_url_for(node, &parts) {
            Some(url) => url,
            None => {
                tracing::error!(node_name = %node.name(), "failed to derive upstream WebSocket URL");
                continue;
            }
        };

        let request = match upstream_request(&upstream_url, &parts.headers) {
            Ok(request) => request,
            Err(error) => {
                tracing::error!(
                    node_name = %node.name(),
                    url = %upstream_url,
                    %error,
                    "failed to build upstream WebSocket handshake"
                );
                continue;
            }
        };

        match connect_async_with_config(request, Some(upstream_config), false).await {
            Ok((upstream, _)) => {
                node.increment_requests();
                balancer.metrics().incr(
                    "websocket.connected",
                    &[("node", node.name().to_string())],
                );
                tracing::info!(
                    node_name = %node.name(),
                    node_url = %node.url(),
                    path = parts.uri.path(),
                    "websocket proxy established"
                );

                let node = Arc::clone(node);
                let metrics = balancer.metrics().clone();
                return ws
                    .write_buffer_size(ws_settings.write_buffer_size)
                    .on_upgrade(move |client| proxy_messages(client, upstream, node, metrics));
            }
            Err(error) => {
                tracing::warn!(
                    node_name = %node.name(),
                    url = %upstream_url,
                    %error,
                    "websocket connection failed"
                );
                balancer.record_server_error(node, Protocol::WebSocket);
            }
        }
    }

    canonical_response(StatusCode::BAD_GATEWAY, CONNECT_FAILED_BODY)
}

/// Rewrite a node's base URL to its WebSocket equivalent for this request:
/// `http → ws`, `https → wss`, path and raw query preserved.
fn upstream_url_for(node: &Arc<BeaconNode>, parts: &request::Parts) -> Option<Url> {
    let mut url = node.url().clone();
    let scheme = match url.scheme() {
        "http" => "ws".to_string(),
        "https" => "wss".to_string(),
        other => other.to_string(),
    };
    url.set_scheme(&scheme).ok()?;
    url.set_path(&join_path(node.url().path(), parts.uri.path()));
    url.set_query(parts.uri.query());
    Some(url)
}

/// Build the upstream handshake request, forwarding the client's headers
/// minus the handshake-specific ones the dialer must own.
fn upstream_request(
    url: &Url,
    client_headers: &HeaderMap,
) -> Result<http::Request<()>, http::Error> {
    let host = url.host_str().unwrap_or_default();
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri(url.as_str())
        .header(HOST, host_header)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_VERSION, "13")
        .header(SEC_WEBSOCKET_KEY, generate_key());

    for (name, value) in client_headers {
        if HANDSHAKE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder.body(())
}

/// Shuttle frames both ways until the first error or close.
async fn proxy_messages(
    client: WebSocket,
    upstream: UpstreamWs,
    node: Arc<BeaconNode>,
    metrics: Metrics,
) {
    let (mut client_sink, mut client_stream) = client.split();
    let (mut upstream_sink, mut upstream_stream) = upstream.split();

    let (error_tx, mut error_rx) = mpsc::channel::<String>(2);

    let client_error_tx = error_tx.clone();
    let client_to_upstream = tokio::spawn(async move {
        loop {
            match client_stream.next().await {
                Some(Ok(message)) => {
                    if let Err(error) = upstream_sink.send(to_upstream_message(message)).await {
                        let _ = client_error_tx
                            .send(format!("upstream write error: {error}"))
                            .await;
                        return;
                    }
                }
                Some(Err(error)) => {
                    let _ = client_error_tx
                        .send(format!("client read error: {error}"))
                        .await;
                    return;
                }
                None => {
                    let _ = client_error_tx
                        .send("client connection closed".to_string())
                        .await;
                    return;
                }
            }
        }
    });

    let upstream_to_client = tokio::spawn(async move {
        loop {
            match upstream_stream.next().await {
                Some(Ok(message)) => {
                    let Some(converted) = to_client_message(message) else {
                        continue;
                    };
                    if let Err(error) = client_sink.send(converted).await {
                        let _ = error_tx.send(format!("client write error: {error}")).await;
                        return;
                    }
                }
                Some(Err(error)) => {
                    let _ = error_tx.send(format!("upstream read error: {error}")).await;
                    return;
                }
                None => {
                    let _ = error_tx
                        .send("upstream connection closed".to_string())
                        .await;
                    return;
                }
            }
        }
    });

    // First error from either pump ends the session.
    let reason = error_rx
        .recv()
        .await
        .unwrap_or_else(|| "connection closed".to_string());
    client_to_upstream.abort();
    upstream_to_client.abort();

    tracing::info!(node_name = %node.name(), %reason, "websocket connection closed");
    metrics.incr("websocket.disconnected", &[("node", node.name().to_string())]);
}

fn to_upstream_message(message: Message) -> UpstreamMessage {
    match message {
        Message::Text(text) => UpstreamMessage::Text(text.to_string().into()),
        Message::Binary(data) => UpstreamMessage::Binary(data),
        Message::Ping(data) => UpstreamMessage::Ping(data),
        Message::Pong(data) => UpstreamMessage::Pong(data),
        Message::Close(frame) => UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
    }
}

/// Upstream → client conversion; raw frames have no axum equivalent and are
/// dropped.
fn to_client_message(message: UpstreamMessage) -> Option<Message> {
    match message {
        UpstreamMessage::Text(text) => Some(Message::Text(text.to_string().into())),
        UpstreamMessage::Binary(data) => Some(Message::Binary(data)),
        UpstreamMessage::Ping(data) => Some(Message::Ping(data)),
        UpstreamMessage::Pong(data) => Some(Message::Pong(data)),
        UpstreamMessage::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        }))),
        UpstreamMessage::Frame(_) => None,
    }
}
