//! Cascade propagation of Open transitions.
//!
//! # Algorithm
//! ```text
//! breaker E → Open
//!     → healthy alternative of E?  yes → cache + publish E's own status only
//!     → list_dependents(E)         err → cache E's own status only
//!     → for each target in dependents ∪ {E}:
//!           publish StatusRecord{target} on topic(target)   (own task)
//!           SET status:<target> open PX open_timeout        (own task)
//!
//! record for D received on topic(D)                          (relay)
//!     → healthy alternative of D?  yes → stop
//!     → for each target in dependents(D):
//!           publish StatusRecord{target} on topic(target)   (same emittedAt)
//!           SET status:<target> open PX remaining
//! ```
//!
//! Every record of one trip carries the same `emittedAt` and timeout, so the
//! whole chain expires together and a consumer can tell a repeat by its
//! expiry.

use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{State, Transition, TransitionObserver};
use crate::broker::{now_millis, StatusBus, StatusRecord};
use crate::config::EndpointPolicy;
use crate::endpoint::{naming, EndpointKey};
use crate::error::CascadeError;
use crate::graph::load_dependents;
use crate::lifecycle::TaskPool;
use crate::observability::metrics;
use crate::store::{StateStore, StoreError};

/// Breaker observer that fans Open transitions out to dependents.
#[derive(Clone)]
pub struct CascadePropagator {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn StatusBus>,
    policy: Arc<EndpointPolicy>,
    tasks: TaskPool,
    open_timeout: Duration,
}

impl CascadePropagator {
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<dyn StatusBus>,
        policy: Arc<EndpointPolicy>,
        tasks: TaskPool,
        open_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            policy,
            tasks,
            open_timeout,
        }
    }

    /// Propagate an Open status of `endpoint`.
    pub async fn propagate(&self, endpoint: EndpointKey) -> Result<(), CascadeError> {
        let origin = StatusRecord::new(endpoint.as_str(), State::Open, self.open_timeout);

        if self.has_healthy_alternative(&endpoint).await {
            tracing::info!(
                endpoint = %endpoint,
                "Alternative endpoint available, not propagating to requiring endpoints"
            );
            self.dispatch(&endpoint, &origin, self.open_timeout, true);
            return Ok(());
        }

        let mut targets = match load_dependents(self.store.as_ref(), &endpoint).await {
            Ok(dependents) => dependents,
            Err(e) => {
                tracing::error!(
                    endpoint = %endpoint,
                    error = %e,
                    "Failed to read requiring endpoints, caching own status only"
                );
                self.write_status(&endpoint, self.open_timeout).await?;
                return Ok(());
            }
        };

        tracing::info!(
            endpoint = %endpoint,
            dependents = targets.len(),
            "Propagating open status to requiring endpoints"
        );
        targets.push(endpoint);
        for target in &targets {
            self.dispatch(target, &origin, self.open_timeout, false);
        }
        Ok(())
    }

    /// Carry an Open status received for `endpoint` on to its own dependents.
    ///
    /// `endpoint`'s own status is the caller's to cache. Returns the number
    /// of dependents the record was forwarded to.
    pub async fn relay(
        &self,
        endpoint: &EndpointKey,
        record: &StatusRecord,
    ) -> Result<usize, CascadeError> {
        let Some(remaining) = record.remaining(now_millis()) else {
            return Ok(0);
        };

        if self.has_healthy_alternative(endpoint).await {
            tracing::debug!(
                endpoint = %endpoint,
                "Alternative endpoint available, not relaying to requiring endpoints"
            );
            return Ok(0);
        }

        let dependents = load_dependents(self.store.as_ref(), endpoint).await?;
        for dependent in &dependents {
            self.dispatch(dependent, record, remaining, false);
        }
        Ok(dependents.len())
    }

    /// Whether any configured alternative of `endpoint` has no cached Open status.
    async fn has_healthy_alternative(&self, endpoint: &EndpointKey) -> bool {
        for alt in self.policy.alternatives(endpoint) {
            match self.store.get(&naming::status_key(&alt.key)).await {
                Err(StoreError::KeyNotFound) => return true,
                Ok(status) if status != State::Open.as_str() => return true,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        alternative = %alt.key,
                        error = %e,
                        "Failed to read alternative endpoint status"
                    );
                }
            }
        }
        false
    }

    /// Publish and cache the Open status of `target` as two independent tasks.
    ///
    /// The published record takes its timing from `origin`.
    fn dispatch(&self, target: &EndpointKey, origin: &StatusRecord, ttl: Duration, suppressed: bool) {
        let record = StatusRecord {
            endpoint: target.as_str().to_string(),
            ..origin.clone()
        };

        let bus = self.bus.clone();
        let topic = naming::topic(target);
        self.tasks.spawn("cascade-publish", async move {
            let result = bus.publish(&topic, &record).await;
            metrics::record_propagation("publish", result.is_ok());
            if result.is_ok() {
                tracing::debug!(
                    endpoint = %record.endpoint,
                    topic = %topic,
                    suppressed,
                    "Published circuit breaker status"
                );
            }
            result.map_err(CascadeError::from)
        });

        let this = self.clone();
        let target = target.clone();
        self.tasks.spawn("cascade-cache", async move {
            this.write_status(&target, ttl).await
        });
    }

    async fn write_status(&self, target: &EndpointKey, ttl: Duration) -> Result<(), CascadeError> {
        let result = self
            .store
            .set_with_expiry(&naming::status_key(target), State::Open.as_str(), ttl)
            .await;
        metrics::record_propagation("cache", result.is_ok());
        result.map_err(CascadeError::from)
    }
}

impl TransitionObserver for CascadePropagator {
    fn on_transition(&self, transition: &Transition) {
        if transition.to != State::Open {
            return;
        }
        let this = self.clone();
        let endpoint = transition.endpoint.clone();
        self.tasks
            .spawn("cascade-propagation", async move { this.propagate(endpoint).await });
    }
}
