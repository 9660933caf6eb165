//! Breaker registry.
//!
//! # Responsibilities
//! - Own one [`CircuitBreaker`] per endpoint, created on first use
//! - Run calls through the endpoint's breaker (`execute`)
//! - Report every transition to the registered observers
//!
//! # Design Decisions
//! - Get-or-create is a single DashMap entry operation, so concurrent first
//!   calls for an endpoint share one breaker
//! - Observers run synchronously on the caller's task and must only dispatch
//!   work, never await it
//! - A call dropped mid-flight releases its admission instead of counting as
//!   a failure

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use super::state::{CircuitBreaker, Settings, Snapshot, State, Ticket, Transition};
use crate::endpoint::EndpointKey;
use crate::observability::metrics;

/// Receives breaker transitions.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, transition: &Transition);
}

/// Outcome of [`BreakerRegistry::execute`] when the call did not succeed.
#[derive(Debug)]
pub enum ExecuteError<E> {
    /// The breaker refused the call; nothing was executed.
    Open,
    /// The call ran and failed.
    Failed(E),
}

/// Concurrent map of endpoint breakers.
pub struct BreakerRegistry {
    breakers: DashMap<EndpointKey, Arc<CircuitBreaker>>,
    settings: Settings,
    observers: Vec<Arc<dyn TransitionObserver>>,
}

impl BreakerRegistry {
    pub fn new(settings: Settings) -> Self {
        Self {
            breakers: DashMap::new(),
            settings,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The breaker for `endpoint`, creating it if this is the first use.
    pub fn get_or_create(&self, endpoint: &EndpointKey) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(endpoint) {
            return existing.clone();
        }
        self.breakers
            .entry(endpoint.clone())
            .or_insert_with(|| {
                tracing::debug!(endpoint = %endpoint, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(endpoint.clone(), self.settings.clone()))
            })
            .clone()
    }

    /// Current state of an endpoint's breaker, if one exists.
    pub fn state(&self, endpoint: &EndpointKey) -> Option<State> {
        let breaker = self.breakers.get(endpoint)?.clone();
        let mut transitions = Vec::new();
        let state = breaker.state(Instant::now(), &mut transitions);
        self.notify(transitions);
        Some(state)
    }

    /// Run `call` through the endpoint's breaker.
    ///
    /// `Err` from the call counts as a failure; `Ok` as a success.
    pub async fn execute<T, E, F, Fut>(
        &self,
        endpoint: &EndpointKey,
        call: F,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self.get_or_create(endpoint);
        let mut transitions = Vec::new();

        let admitted = breaker.try_acquire(Instant::now(), &mut transitions);
        self.notify(std::mem::take(&mut transitions));
        let ticket = match admitted {
            Ok(ticket) => ticket,
            Err(_) => {
                metrics::record_short_circuit("breaker");
                return Err(ExecuteError::Open);
            }
        };

        let guard = AdmissionGuard {
            breaker: &breaker,
            ticket: Some(ticket),
        };
        let result = call().await;
        guard.disarm();

        breaker.record(ticket, result.is_ok(), Instant::now(), &mut transitions);
        self.notify(transitions);

        result.map_err(ExecuteError::Failed)
    }

    /// Stored state of every breaker, ordered by endpoint.
    pub fn snapshot(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        all.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        all
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn notify(&self, transitions: Vec<Transition>) {
        for transition in transitions {
            tracing::info!(
                endpoint = %transition.endpoint,
                from = %transition.from,
                to = %transition.to,
                generation = transition.generation,
                "Circuit breaker state changed"
            );
            metrics::record_transition(transition.from, transition.to);
            for observer in &self.observers {
                observer.on_transition(&transition);
            }
        }
    }
}

/// Abandons the admission if the call future is dropped before completing.
struct AdmissionGuard<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Option<Ticket>,
}

impl AdmissionGuard<'_> {
    fn disarm(mut self) {
        self.ticket = None;
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.abandon(ticket);
        }
    }
}
