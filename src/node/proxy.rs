//! Per-node outbound proxy.
//!
//! Each backend owns a pre-built [`reqwest::Client`] wired to the shared DNS
//! cache, so its connection pool and TLS state stay warm across requests.
//! Forwarded requests get the header treatment hosted API providers expect;
//! responses are buffered into a [`RecordedResponse`] so the routing engine
//! can discard failed attempts without the client ever seeing them.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use http::header::{
    HeaderMap, HeaderName, ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT,
};
use http::{request, Method, StatusCode};
use url::Url;

use crate::config::Config;
use crate::node::dns::CachingResolver;

/// Providers whose HTTP/2 support is broken enough to pin HTTP/1.1,
/// recognised by substring match on the node URL.
const HTTP2_INCOMPATIBLE_PROVIDERS: &[&str] = &["chainstack.com"];

/// Request headers that must not travel upstream: hop-by-hop headers plus
/// the ones strict API providers reject. The Connection header is handled
/// separately; only an explicit `close` is dropped.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "x-forwarded-for",
    "x-real-ip",
    "referer",
];

/// Pre-built reverse proxy for one backend.
#[derive(Debug, Clone)]
pub struct NodeProxy {
    client: reqwest::Client,
    base: Url,
    user_agent: String,
}

impl NodeProxy {
    /// Build the outbound client for `base` with the configured transport
    /// tuning.
    pub fn new(
        base: Url,
        config: &Config,
        resolver: Arc<CachingResolver>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.proxy.max_idle_connections_per_host)
            .pool_idle_timeout(config.proxy.idle_connection_timeout())
            .connect_timeout(config.dns.connection_timeout())
            .read_timeout(config.proxy.response_header_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .dns_resolver(resolver);

        // Some hosted providers negotiate HTTP/2 and then mishandle it.
        if HTTP2_INCOMPATIBLE_PROVIDERS
            .iter()
            .any(|provider| base.as_str().contains(provider))
        {
            builder = builder.http1_only();
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            base,
            user_agent: config.proxy.user_agent.clone(),
        })
    }

    /// Forward one request attempt and record the full response.
    ///
    /// The attempt is bounded by `timeout`; body bytes are buffered so the
    /// caller decides whether they ever reach the client.
    pub async fn forward(
        &self,
        parts: &request::Parts,
        body: Bytes,
        timeout: Duration,
    ) -> Result<RecordedResponse, reqwest::Error> {
        let mut url = self.base.clone();
        url.set_path(&join_path(self.base.path(), parts.uri.path()));
        url.set_query(parts.uri.query());

        let mut headers = parts.headers.clone();
        rewrite_headers(
            &mut headers,
            &parts.method,
            self.base.scheme() == "https",
            &self.user_agent,
        );

        let response = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers)
            .body(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(RecordedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join the backend base path with the request path, collapsing the slash
/// between them.
pub(crate) fn join_path(base: &str, request: &str) -> String {
    match (base.ends_with('/'), request.starts_with('/')) {
        (true, true) => format!("{}{}", base, &request[1..]),
        (false, false) => format!("{base}/{request}"),
        _ => format!("{base}{request}"),
    }
}

/// Apply the outbound header contract.
///
/// Strips hop-by-hop and provider-hostile headers, forces a JSON accept,
/// backfills User-Agent and Content-Type, and marks HTTPS targets with
/// X-Forwarded-Proto. The Host header is recomputed by the client from the
/// target URL.
fn rewrite_headers(headers: &mut HeaderMap, method: &Method, target_https: bool, user_agent: &str) {
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    for name in STRIPPED_REQUEST_HEADERS {
        headers.remove(*name);
    }

    // Some API providers are strict about connection headers: drop an
    // explicit close, forward anything else untouched.
    let close_requested = headers
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    if close_requested {
        headers.remove(CONNECTION);
    }

    if !headers.contains_key(USER_AGENT) {
        if let Ok(value) = user_agent.parse() {
            headers.insert(USER_AGENT, value);
        }
    }

    headers.insert(ACCEPT, "application/json".parse().expect("static header"));

    if !headers.contains_key(CONTENT_TYPE) && (method == Method::POST || method == Method::PUT) {
        headers.insert(CONTENT_TYPE, "application/json".parse().expect("static header"));
    }

    if target_https {
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            "https".parse().expect("static header"),
        );
    }
}

/// A fully buffered backend response.
///
/// Only a successful attempt is ever flushed to the client; failed attempts
/// are dropped wholesale, so the client sees exactly one response no matter
/// how many backends were tried.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedResponse {
    /// Success means anything below the server-error and client-error
    /// ranges: 2xx and 3xx both count.
    pub fn is_success(&self) -> bool {
        let code = self.status.as_u16();
        (200..400).contains(&code)
    }

    pub fn is_server_error(&self) -> bool {
        self.status.as_u16() >= 500
    }

    pub fn is_client_error(&self) -> bool {
        let code = self.status.as_u16();
        (400..500).contains(&code)
    }

    /// Flush the recorded response to the client, byte-exact: the status,
    /// headers, and body delivered are exactly what the backend sent.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, REFERER, TRANSFER_ENCODING, UPGRADE};

    #[test]
    fn join_path_collapses_slashes() {
        assert_eq!(join_path("/", "/eth/v1/node/syncing"), "/eth/v1/node/syncing");
        assert_eq!(join_path("/v3/key", "/eth/v1/events"), "/v3/key/eth/v1/events");
        assert_eq!(join_path("/v3/key/", "/eth/v1/events"), "/v3/key/eth/v1/events");
        assert_eq!(join_path("/v3/key", "eth"), "/v3/key/eth");
    }

    #[test]
    fn rewrite_strips_provider_hostile_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-real-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert(REFERER, HeaderValue::from_static("http://evil.example"));
        headers.insert(UPGRADE, HeaderValue::from_static("h2c"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");

        assert!(headers.get("x-forwarded-for").is_none());
        assert!(headers.get("x-real-ip").is_none());
        assert!(headers.get(REFERER).is_none());
        assert!(headers.get(UPGRADE).is_none());
        assert!(headers.get(TRANSFER_ENCODING).is_none());
    }

    #[test]
    fn rewrite_drops_only_explicit_connection_close() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");
        assert!(headers.get(CONNECTION).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("Close"));
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");
        assert!(headers.get(CONNECTION).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");
        assert_eq!(headers.get(CONNECTION).unwrap(), "keep-alive");
    }

    #[test]
    fn rewrite_backfills_user_agent_and_accept() {
        let mut headers = HeaderMap::new();
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");

        assert_eq!(headers.get(USER_AGENT).unwrap(), "beacon-proxy/0.1");
        assert_eq!(headers.get(ACCEPT).unwrap(), "application/json");
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn rewrite_preserves_existing_user_agent() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("client/2.0"));
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");

        assert_eq!(headers.get(USER_AGENT).unwrap(), "client/2.0");
    }

    #[test]
    fn rewrite_sets_content_type_on_mutating_methods() {
        let mut headers = HeaderMap::new();
        rewrite_headers(&mut headers, &Method::POST, false, "beacon-proxy/0.1");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        rewrite_headers(&mut headers, &Method::PUT, false, "beacon-proxy/0.1");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/octet-stream");
    }

    #[test]
    fn rewrite_marks_https_targets() {
        let mut headers = HeaderMap::new();
        rewrite_headers(&mut headers, &Method::GET, true, "beacon-proxy/0.1");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");

        let mut headers = HeaderMap::new();
        rewrite_headers(&mut headers, &Method::GET, false, "beacon-proxy/0.1");
        assert!(headers.get("x-forwarded-proto").is_none());
    }

    #[test]
    fn success_classification_bounds() {
        let recorded = |code: u16| RecordedResponse {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        assert!(recorded(200).is_success());
        assert!(recorded(304).is_success());
        assert!(recorded(399).is_success());
        assert!(!recorded(400).is_success());
        assert!(recorded(404).is_client_error());
        assert!(!recorded(404).is_server_error());
        assert!(recorded(500).is_server_error());
        assert!(recorded(503).is_server_error());
    }

    #[test]
    fn recorded_response_flushes_byte_exact() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("eth-consensus-version", HeaderValue::from_static("deneb"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        let recorded = RecordedResponse {
            status: StatusCode::CREATED,
            headers: headers.clone(),
            body: Bytes::from_static(b"{\"data\":{}}"),
        };

        // What the client sees is exactly what was recorded, headers
        // included.
        let response = recorded.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers(), &headers);
    }
}
