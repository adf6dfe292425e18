//! Beacon Chain API endpoint whitelist.
//!
//! Only paths from the official Beacon API specification
//! (<https://ethereum.github.io/beacon-APIs/>) are allowed through the
//! proxy; everything else is rejected before any upstream I/O happens.

use regex::RegexSet;

/// Anchored patterns covering the proxied Beacon API surface.
const VALID_PATH_PATTERNS: &[&str] = &[
    // Beacon endpoints
    r"^/eth/v1/beacon/genesis$",
    r"^/eth/v1/beacon/states/[^/]+/root$",
    r"^/eth/v1/beacon/states/[^/]+/fork$",
    r"^/eth/v1/beacon/states/[^/]+/finality_checkpoints$",
    r"^/eth/v1/beacon/states/[^/]+/validators$",
    r"^/eth/v1/beacon/states/[^/]+/validators/[^/]+$",
    r"^/eth/v1/beacon/states/[^/]+/validator_balances$",
    r"^/eth/v1/beacon/states/[^/]+/committees$",
    r"^/eth/v1/beacon/states/[^/]+/sync_committees$",
    r"^/eth/v1/beacon/states/[^/]+/randao$",
    r"^/eth/v1/beacon/headers$",
    r"^/eth/v1/beacon/headers/[^/]+$",
    r"^/eth/v1/beacon/blocks/[^/]+$",
    r"^/eth/v1/beacon/blocks/[^/]+/root$",
    r"^/eth/v1/beacon/blocks/[^/]+/attestations$",
    r"^/eth/v1/beacon/blob_sidecars/[^/]+$",
    r"^/eth/v1/beacon/blobs/[^/]+$",
    r"^/eth/v1/beacon/pool/attestations$",
    r"^/eth/v1/beacon/pool/attester_slashings$",
    r"^/eth/v1/beacon/pool/proposer_slashings$",
    r"^/eth/v1/beacon/pool/voluntary_exits$",
    r"^/eth/v1/beacon/pool/bls_to_execution_changes$",
    r"^/eth/v1/beacon/light_client/bootstrap/[^/]+$",
    r"^/eth/v1/beacon/light_client/updates$",
    r"^/eth/v1/beacon/light_client/finality_update$",
    r"^/eth/v1/beacon/light_client/optimistic_update$",
    r"^/eth/v1/beacon/deposit_snapshot$",
    r"^/eth/v1/beacon/rewards/blocks/[^/]+$",
    r"^/eth/v1/beacon/rewards/attestations/[^/]+$",
    r"^/eth/v1/beacon/rewards/sync_committee/[^/]+$",
    // V2/V3 beacon endpoints
    r"^/eth/v2/beacon/blocks/[^/]+$",
    r"^/eth/v2/beacon/pool/attestations$",
    r"^/eth/v3/beacon/blocks/[^/]+$",
    // Config endpoints
    r"^/eth/v1/config/fork_schedule$",
    r"^/eth/v1/config/spec$",
    r"^/eth/v1/config/deposit_contract$",
    // Debug endpoints
    r"^/eth/v1/debug/beacon/states/[^/]+$",
    r"^/eth/v1/debug/beacon/heads$",
    r"^/eth/v1/debug/fork_choice$",
    r"^/eth/v2/debug/beacon/states/[^/]+$",
    r"^/eth/v2/debug/beacon/heads$",
    // Event stream (WebSocket upgrades land here)
    r"^/eth/v1/events$",
    // Node endpoints
    r"^/eth/v1/node/identity$",
    r"^/eth/v1/node/peers$",
    r"^/eth/v1/node/peers/[^/]+$",
    r"^/eth/v1/node/peer_count$",
    r"^/eth/v1/node/version$",
    r"^/eth/v1/node/syncing$",
    r"^/eth/v1/node/health$",
    // Validator endpoints
    r"^/eth/v1/validator/duties/attester/[^/]+$",
    r"^/eth/v1/validator/duties/proposer/[^/]+$",
    r"^/eth/v1/validator/duties/sync/[^/]+$",
    r"^/eth/v1/validator/blocks/[^/]+$",
    r"^/eth/v1/validator/attestation_data$",
    r"^/eth/v1/validator/aggregate_attestation$",
    r"^/eth/v1/validator/aggregate_and_proofs$",
    r"^/eth/v1/validator/beacon_committee_subscriptions$",
    r"^/eth/v1/validator/sync_committee_subscriptions$",
    r"^/eth/v1/validator/sync_committee_contribution$",
    r"^/eth/v1/validator/contribution_and_proofs$",
    r"^/eth/v1/validator/prepare_beacon_proposer$",
    r"^/eth/v1/validator/register_validator$",
    r"^/eth/v1/validator/liveness/[^/]+$",
    r"^/eth/v2/validator/blocks/[^/]+$",
    r"^/eth/v2/validator/aggregate_attestation$",
    r"^/eth/v3/validator/blocks/[^/]+$",
    // Builder endpoints (MEV-Boost)
    r"^/eth/v1/builder/states/[^/]+/expected_withdrawals$",
];

/// Validates that requests target legitimate Beacon Chain API endpoints.
#[derive(Debug)]
pub struct BeaconEndpointValidator {
    valid_paths: RegexSet,
}

impl BeaconEndpointValidator {
    pub fn new() -> Self {
        Self {
            valid_paths: RegexSet::new(VALID_PATH_PATTERNS).expect("static patterns compile"),
        }
    }

    /// Check whether `path` is a valid Beacon Chain API endpoint.
    pub fn is_valid(&self, path: &str) -> bool {
        let path = path.trim().trim_end_matches('/');
        if path.is_empty() {
            return false;
        }
        self.valid_paths.is_match(path)
    }
}

impl Default for BeaconEndpointValidator {
    fn default() -> Self {
        Self::new()
    }
}
