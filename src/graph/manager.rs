//! Dependency graph manager.
//!
//! # Responsibilities
//! - Record "dependent requires dependency" edges in the shared store
//! - List the dependents of an endpoint at propagation time
//! - Keep exactly one status consumer per endpoint in this process
//! - Rebuild consumers from persisted edges at startup
//!
//! # Design Decisions
//! - The set-add reply (new member or not) decides whether a consumer is
//!   needed; there is no separate existence check to race with
//! - The local memo is a concurrent set; `insert` is the check-and-insert
//! - Edges are never removed

use std::sync::Arc;

use dashmap::DashSet;

use crate::broker::{StatusBus, StatusHandler};
use crate::cascade::{CascadePropagator, StatusConsumer};
use crate::endpoint::{naming, EndpointKey};
use crate::error::CascadeError;
use crate::lifecycle::{ShutdownSignal, TaskPool};
use crate::store::StateStore;

/// Persisted dependency graph plus this process's subscription memo.
pub struct DependencyGraph {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn StatusBus>,
    propagator: CascadePropagator,
    tasks: TaskPool,
    shutdown: ShutdownSignal,
    subscribed: DashSet<EndpointKey>,
    scan_page_size: usize,
}

impl DependencyGraph {
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<dyn StatusBus>,
        propagator: CascadePropagator,
        tasks: TaskPool,
        shutdown: ShutdownSignal,
        scan_page_size: usize,
    ) -> Self {
        Self {
            store,
            bus,
            propagator,
            tasks,
            shutdown,
            subscribed: DashSet::new(),
            scan_page_size: scan_page_size.max(1),
        }
    }

    /// Add `dependent` to the requiring set of `dependency`.
    ///
    /// Returns whether the edge was new. A new edge makes sure this process
    /// consumes the dependent's topic.
    pub async fn record_dependency(
        &self,
        dependent: &EndpointKey,
        dependency: &EndpointKey,
    ) -> Result<bool, CascadeError> {
        if dependent == dependency {
            return Ok(false);
        }

        let added = self
            .store
            .add_members(
                &naming::requirings_key(dependency),
                &[dependent.as_str().to_string()],
            )
            .await?;

        if added == 0 {
            return Ok(false);
        }

        tracing::info!(
            dependent = %dependent,
            dependency = %dependency,
            "Recorded new requiring endpoint"
        );
        self.ensure_subscribed(dependent);
        Ok(true)
    }

    /// Endpoints that declared `endpoint` as a requirement.
    pub async fn list_dependents(
        &self,
        endpoint: &EndpointKey,
    ) -> Result<Vec<EndpointKey>, CascadeError> {
        load_dependents(self.store.as_ref(), endpoint).await
    }

    /// Start the status consumer for `endpoint` unless one is running.
    ///
    /// Returns whether a consumer was started by this call.
    pub fn ensure_subscribed(&self, endpoint: &EndpointKey) -> bool {
        if !self.subscribed.insert(endpoint.clone()) {
            return false;
        }

        let topic = naming::topic(endpoint);
        let bus = self.bus.clone();
        let handler: Arc<dyn StatusHandler> = Arc::new(StatusConsumer::new(
            endpoint.clone(),
            self.store.clone(),
            self.propagator.clone(),
        ));
        let shutdown = self.shutdown.clone();

        tracing::debug!(endpoint = %endpoint, topic = %topic, "Starting status consumer");
        self.tasks.spawn_long_lived("status-consumer", async move {
            bus.subscribe_async(&topic, handler, shutdown).await;
        });
        true
    }

    pub fn is_subscribed(&self, endpoint: &EndpointKey) -> bool {
        self.subscribed.contains(endpoint)
    }

    /// Endpoints with a running consumer, sorted.
    pub fn subscriptions(&self) -> Vec<EndpointKey> {
        let mut all: Vec<EndpointKey> = self.subscribed.iter().map(|e| e.key().clone()).collect();
        all.sort();
        all
    }

    /// Start a consumer for every dependent found in persisted requiring sets.
    ///
    /// Returns the number of consumers started.
    pub async fn rehydrate(&self) -> Result<usize, CascadeError> {
        let keys = self
            .store
            .scan(&naming::requirings_pattern(), self.scan_page_size)
            .await?;

        let mut started = 0;
        for key in keys {
            let Some(dependency) = naming::endpoint_from_requirings_key(&key) else {
                tracing::warn!(key = %key, "Skipping unrecognized requirings key");
                continue;
            };
            let dependents = match self.list_dependents(&dependency).await {
                Ok(dependents) => dependents,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Failed to read requiring endpoints");
                    continue;
                }
            };
            for dependent in dependents {
                if self.ensure_subscribed(&dependent) {
                    started += 1;
                }
            }
        }

        tracing::info!(consumers = started, "Rehydrated status subscriptions");
        Ok(started)
    }
}

/// Sorted dependents of `endpoint` read from its requiring set.
///
/// Malformed members and `endpoint` itself are skipped.
pub async fn load_dependents(
    store: &dyn StateStore,
    endpoint: &EndpointKey,
) -> Result<Vec<EndpointKey>, CascadeError> {
    let members = store.members(&naming::requirings_key(endpoint)).await?;

    let mut dependents: Vec<EndpointKey> = members
        .iter()
        .filter_map(|raw| {
            let parsed = EndpointKey::from_stored(raw);
            if parsed.is_none() {
                tracing::warn!(endpoint = %endpoint, member = %raw, "Ignoring malformed requiring endpoint");
            }
            parsed
        })
        .filter(|dependent| dependent != endpoint)
        .collect();
    dependents.sort();
    Ok(dependents)
}
