//! Normalized, read-only view of the fallback configuration.
//!
//! Entries are keyed by [`EndpointKey`] built with the same normalizer as
//! live requests, so `GET https://www.a/x/` in the file matches a request
//! for `get http://a/x`.

use std::collections::{HashMap, HashSet};

use crate::config::schema::CascadeConfig;
use crate::endpoint::EndpointKey;
use crate::error::CascadeError;

/// One fallback target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    /// Normalized identity, used for gating and breaker lookup.
    pub key: EndpointKey,
    /// Method to call with (uppercased).
    pub method: String,
    /// URL as configured, used for the actual call.
    pub url: String,
}

/// Alternatives and exceptions by endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointPolicy {
    alternatives: HashMap<EndpointKey, Vec<Alternative>>,
    exceptions: HashSet<EndpointKey>,
}

impl EndpointPolicy {
    pub fn from_config(config: &CascadeConfig) -> Result<Self, CascadeError> {
        let mut policy = Self::default();

        for entry in &config.alternative_endpoints {
            let primary = EndpointKey::new(&entry.method, &entry.endpoint)?;
            let mut alternatives = Vec::with_capacity(entry.alternatives.len());
            for alt in &entry.alternatives {
                alternatives.push(Alternative {
                    key: EndpointKey::new(&alt.method, &alt.endpoint)?,
                    method: alt.method.trim().to_uppercase(),
                    url: alt.endpoint.trim().to_string(),
                });
            }
            // A later entry for the same primary replaces the earlier one.
            policy.alternatives.insert(primary, alternatives);
        }

        for entry in &config.exceptions {
            policy
                .exceptions
                .insert(EndpointKey::new(&entry.method, &entry.endpoint)?);
        }

        Ok(policy)
    }

    /// Configured alternatives for `endpoint`, in declared order.
    pub fn alternatives(&self, endpoint: &EndpointKey) -> &[Alternative] {
        self.alternatives
            .get(endpoint)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_exception(&self, endpoint: &EndpointKey) -> bool {
        self.exceptions.contains(endpoint)
    }

    /// Every distinct alternative across all primaries.
    pub fn all_alternatives(&self) -> Vec<&Alternative> {
        let mut seen = HashSet::new();
        let mut all: Vec<&Alternative> = self
            .alternatives
            .values()
            .flatten()
            .filter(|alt| seen.insert(alt.key.clone()))
            .collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }
}
