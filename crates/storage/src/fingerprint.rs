//! Cache keys for connection parameter sets.

use sha2::{Digest, Sha256};
use stowage_core::{ConnectionParams, StorageId};

/// Width of a parameter fingerprint in hex characters.
pub const FINGERPRINT_LEN: usize = 32;

/// Cache key for a persisted storage configuration.
pub fn config_key(id: StorageId) -> String {
    format!("config_{}", id.0)
}

/// Deterministic fingerprint over the full connection parameter tuple.
///
/// Fields are joined in a fixed order with `|`; absent values render as
/// empty strings. Any differing field yields a different key.
pub fn params_key(params: &ConnectionParams) -> String {
    let material = format!(
        "{}|{}|{}|{}|{}|{}",
        params.endpoint.as_deref().unwrap_or_default(),
        params.access_key.as_deref().unwrap_or_default(),
        params.secret_key.as_deref().unwrap_or_default(),
        params.region,
        params.use_ssl,
        params.verify_ssl,
    );
    let digest = Sha256::digest(material.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(FINGERPRINT_LEN);
    key
}
