//! Status consumption for one endpoint topic.
//!
//! Every record received on `topic(e)` is written to `status:<e>` with a TTL
//! equal to the time it has left, then relayed to `e`'s own dependents so a
//! cascade keeps going past the first hop. Expired records are dropped. The
//! bus acknowledges a record only after [`StatusConsumer::handle`] returns
//! `Ok`, so a failed store write or dependents read is redelivered.
//!
//! A consumer relays each expiry at most once. That ends relays around a
//! dependency cycle and drops the duplicate a trip delivers when a process
//! consumes both the tripped endpoint's topic and a dependent's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::CascadePropagator;
use crate::breaker::State;
use crate::broker::{now_millis, StatusHandler, StatusRecord};
use crate::endpoint::{naming, EndpointKey};
use crate::error::CascadeError;
use crate::observability::metrics;
use crate::store::StateStore;

/// Handler attached to the topic of one endpoint.
pub struct StatusConsumer {
    endpoint: EndpointKey,
    store: Arc<dyn StateStore>,
    propagator: CascadePropagator,
    /// Expiry (Unix ms) of the latest record relayed onward.
    relayed_until: AtomicU64,
}

impl StatusConsumer {
    pub fn new(endpoint: EndpointKey, store: Arc<dyn StateStore>, propagator: CascadePropagator) -> Self {
        Self {
            endpoint,
            store,
            propagator,
            relayed_until: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl StatusHandler for StatusConsumer {
    async fn handle(&self, record: StatusRecord) -> Result<(), CascadeError> {
        if record.endpoint != self.endpoint.as_str() {
            tracing::warn!(
                endpoint = %self.endpoint,
                record_endpoint = %record.endpoint,
                "Status record names another endpoint, caching under the topic's endpoint"
            );
        }

        let cached = cache_status(self.store.as_ref(), &self.endpoint, &record, now_millis()).await?;
        if !cached || record.status != State::Open {
            return Ok(());
        }

        let expires_at = record.expires_at();
        if self.relayed_until.load(Ordering::SeqCst) >= expires_at {
            tracing::debug!(endpoint = %self.endpoint, "Status already relayed");
            return Ok(());
        }

        let forwarded = self.propagator.relay(&self.endpoint, &record).await?;
        self.relayed_until.fetch_max(expires_at, Ordering::SeqCst);
        if forwarded > 0 {
            tracing::info!(
                endpoint = %self.endpoint,
                dependents = forwarded,
                "Relayed open status to requiring endpoints"
            );
        }
        Ok(())
    }
}

/// Cache `record` as the status of `endpoint` for the rest of its lifetime.
///
/// Returns `false` if the record had already expired at `now_ms` and was
/// discarded.
pub async fn cache_status(
    store: &dyn StateStore,
    endpoint: &EndpointKey,
    record: &StatusRecord,
    now_ms: u64,
) -> Result<bool, CascadeError> {
    let Some(remaining) = record.remaining(now_ms) else {
        tracing::debug!(
            endpoint = %endpoint,
            status = %record.status,
            emitted_at = record.emitted_at,
            "Discarding expired status record"
        );
        metrics::record_stale_record();
        return Ok(false);
    };

    store
        .set_with_expiry(
            &naming::status_key(endpoint),
            record.status.as_str(),
            remaining,
        )
        .await?;

    tracing::info!(
        endpoint = %endpoint,
        status = %record.status,
        ttl_ms = remaining.as_millis() as u64,
        "Cached circuit breaker status"
    );
    Ok(true)
}
