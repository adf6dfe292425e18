//! Health probe against `/eth/v1/node/syncing`.
//!
//! A node is healthy iff the probe returns 200, the body parses, the node
//! reports `is_syncing == false`, and `sync_distance == "0"`. Everything
//! else maps to a tagged failure reason; the reason strings feed dashboards
//! and must stay stable.

use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Response shape of `/eth/v1/node/syncing`.
#[derive(Debug, Deserialize)]
pub struct SyncingResponse {
    pub data: SyncingData,
}

#[derive(Debug, Deserialize)]
pub struct SyncingData {
    pub is_syncing: bool,
    pub sync_distance: String,
}

/// Classified probe failure.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("request failed: {0}")]
    RequestFailed(#[source] reqwest::Error),

    #[error("non-200 status code: {status}")]
    Non200Status { status: u16 },

    #[error("failed to read response body: {0}")]
    ReadBodyFailed(#[source] reqwest::Error),

    #[error("failed to parse JSON: {0}")]
    JsonParseFailed(#[source] serde_json::Error),

    #[error("not synced (is_syncing={is_syncing}, sync_distance={sync_distance})")]
    IsSyncing {
        is_syncing: bool,
        sync_distance: String,
    },

    #[error("not synced (sync_distance={sync_distance})")]
    SyncDistanceNotZero { sync_distance: String },
}

impl ProbeFailure {
    /// Stable tag for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::RequestFailed(_) => "request_failed",
            Self::Non200Status { .. } => "non_200_status",
            Self::ReadBodyFailed(_) => "read_body_failed",
            Self::JsonParseFailed(_) => "json_parse_failed",
            Self::IsSyncing { .. } => "is_syncing",
            Self::SyncDistanceNotZero { .. } => "sync_distance_not_zero",
        }
    }
}

/// Classify a probe response. Pure over `(status, body)` so identical
/// inputs always yield identical tagged outcomes.
pub fn classify(status: StatusCode, body: &[u8]) -> Result<(), ProbeFailure> {
    if status != StatusCode::OK {
        return Err(ProbeFailure::Non200Status {
            status: status.as_u16(),
        });
    }

    let parsed: SyncingResponse =
        serde_json::from_slice(body).map_err(ProbeFailure::JsonParseFailed)?;

    if parsed.data.is_syncing {
        return Err(ProbeFailure::IsSyncing {
            is_syncing: parsed.data.is_syncing,
            sync_distance: parsed.data.sync_distance,
        });
    }

    if parsed.data.sync_distance != "0" {
        return Err(ProbeFailure::SyncDistanceNotZero {
            sync_distance: parsed.data.sync_distance,
        });
    }

    Ok(())
}

/// Probe one node's syncing endpoint with a hard timeout.
///
/// No side effects on node counters; the scheduler decides how to react.
pub async fn probe(
    client: &reqwest::Client,
    base_url: &Url,
    timeout: Duration,
) -> Result<(), ProbeFailure> {
    let endpoint = format!(
        "{}/eth/v1/node/syncing",
        base_url.as_str().trim_end_matches('/')
    );

    let response = client
        .get(endpoint)
        .timeout(timeout)
        .send()
        .await
        .map_err(ProbeFailure::RequestFailed)?;

    let status = response.status();
    let body = response.bytes().await.map_err(ProbeFailure::ReadBodyFailed)?;

    classify(status, &body)
}
