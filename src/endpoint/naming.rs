//! Key and topic naming for shared state.
//!
//! Every storage key and topic name derived from an [`EndpointKey`] is
//! produced here and nowhere else.
//!
//! ```text
//! status:<endpoint>       TTL-bearing breaker status string
//! requirings:<endpoint>   set of dependents of <endpoint>
//! <hex(endpoint)>         status bus topic
//! ```

use crate::endpoint::EndpointKey;

pub const STATUS_KEY_PREFIX: &str = "status:";
pub const REQUIRINGS_KEY_PREFIX: &str = "requirings:";

/// Status cache key for an endpoint.
pub fn status_key(endpoint: &EndpointKey) -> String {
    format!("{}{}", STATUS_KEY_PREFIX, endpoint)
}

/// Dependency set key for an endpoint.
pub fn requirings_key(endpoint: &EndpointKey) -> String {
    format!("{}{}", REQUIRINGS_KEY_PREFIX, endpoint)
}

/// Scan pattern matching every dependency set key.
pub fn requirings_pattern() -> String {
    format!("{}*", REQUIRINGS_KEY_PREFIX)
}

/// Recover the endpoint from a `requirings:<endpoint>` key.
pub fn endpoint_from_requirings_key(key: &str) -> Option<EndpointKey> {
    key.strip_prefix(REQUIRINGS_KEY_PREFIX)
        .and_then(EndpointKey::from_stored)
}

/// Status bus topic for an endpoint.
///
/// Hex keeps the topic within the `[a-zA-Z0-9._-]` alphabet brokers accept
/// and is reversible.
pub fn topic(endpoint: &EndpointKey) -> String {
    hex::encode(endpoint.as_str())
}
