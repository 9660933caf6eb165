//! Endpoint identity.
//!
//! # Responsibilities
//! - Canonicalize a method + URL pair into `METHOD:host/path`
//! - Rebuild keys from their stored string form (set members, topics)
//!
//! # Design Decisions
//! - Scheme, query and fragment are not part of the identity
//! - A leading `www.` and a single trailing `/` are stripped
//! - Host and path are lowercased, method is uppercased
//! - Non-default ports stay in the key (`host:8080/path`)

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CascadeError;

/// Normalized identity of a downstream endpoint.
///
/// Used as the circuit breaker name, the status cache key suffix and the
/// dependency graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointKey(String);

impl EndpointKey {
    /// Normalize a method and URL into an endpoint key.
    pub fn new(method: &str, url: &str) -> Result<Self, CascadeError> {
        let method = method.trim().to_uppercase();
        if method.is_empty() {
            return Err(CascadeError::Validation("method is required".to_string()));
        }
        let target = general_url_format(url)?;
        Ok(Self(format!("{}:{}", method, target)))
    }

    /// Rebuild a key from its stored `METHOD:host/path` form.
    ///
    /// Returns `None` for strings that were not produced by [`EndpointKey::new`].
    pub fn from_stored(raw: &str) -> Option<Self> {
        let (method, target) = raw.split_once(':')?;
        if method.is_empty() || target.is_empty() {
            return None;
        }
        if method.chars().any(|c| !c.is_ascii_alphabetic() || c.is_ascii_lowercase()) {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The HTTP method part of the key.
    pub fn method(&self) -> &str {
        self.0.split_once(':').map(|(m, _)| m).unwrap_or_default()
    }

    /// The `host/path` part of the key.
    pub fn target(&self) -> &str {
        self.0.split_once(':').map(|(_, t)| t).unwrap_or_default()
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EndpointKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a URL to `host[:port]/path` with scheme, `www.` and trailing slash removed.
fn general_url_format(raw: &str) -> Result<String, CascadeError> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(CascadeError::InvalidUrl {
            url: raw.to_string(),
            reason: "url is empty".to_string(),
        });
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed
    } else {
        format!("http://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| CascadeError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let host = match parsed.host_str() {
        Some(h) if !h.is_empty() => h,
        _ => {
            return Err(CascadeError::InvalidUrl {
                url: raw.to_string(),
                reason: "url has no host".to_string(),
            })
        }
    };
    let host = host.strip_prefix("www.").unwrap_or(host);

    let mut target = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path = parsed.path();
    target.push_str(path.strip_suffix('/').unwrap_or(path));

    Ok(target)
}
