//! Request orchestration.
//!
//! # Request Flow
//! ```text
//! handle(request)
//!     → normalize method + url → EndpointKey k          (InvalidUrl on failure)
//!     → requiring endpoint?    → record_dependency       (detached task)
//!     → first sight of k?      → one-shot status read, cache it, start consumer
//!     → status:<k> == open?    → handle_open
//!     → breaker(k).execute(downstream call)
//!           Ok        → response
//!           Open      → handle_open
//!           Failed    → DownstreamExecutionFailed
//!
//! handle_open: alternatives → fallback resolver
//!              exception    → direct call, no breaker
//!              otherwise    → CircuitBreakerOpen
//! ```
//!
//! # Design Decisions
//! - Store and bus failures on the request path fail open
//! - Propagation happens in the breaker's transition observer and is never
//!   awaited here

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::client::{CascadeResponse, Downstream, DownstreamRequest};
use super::fallback::FallbackResolver;
use crate::breaker::{BreakerRegistry, ExecuteError, Settings, State};
use crate::broker::{now_millis, BrokerError, StatusBus};
use crate::cascade::{cache_status, CascadePropagator};
use crate::config::{CascadeConfig, EndpointPolicy};
use crate::endpoint::{naming, EndpointKey};
use crate::error::CascadeError;
use crate::graph::DependencyGraph;
use crate::lifecycle::{ShutdownSignal, TaskPool};
use crate::observability::metrics;
use crate::store::{StateStore, StoreError};

/// A call to route through the breaker.
#[derive(Debug, Clone, Default)]
pub struct CascadeRequest {
    pub method: String,
    pub url: String,
    pub header: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Endpoint on whose behalf this call is made.
    pub requiring_endpoint: Option<String>,
    pub requiring_method: Option<String>,
}

impl CascadeRequest {
    fn validate(&self) -> Result<(), CascadeError> {
        if self.method.trim().is_empty() {
            return Err(CascadeError::Validation("method is required".into()));
        }
        if self.url.trim().is_empty() {
            return Err(CascadeError::Validation("url is required".into()));
        }
        Ok(())
    }

    fn downstream(&self) -> DownstreamRequest {
        DownstreamRequest {
            method: self.method.trim().to_uppercase(),
            url: self.url.trim().to_string(),
            header: self.header.clone(),
            body: self.body.clone(),
        }
    }

    /// The requiring endpoint, when both its url and method are given.
    fn requiring_key(&self) -> Option<EndpointKey> {
        let url = self.requiring_endpoint.as_deref().filter(|s| !s.trim().is_empty())?;
        let method = self.requiring_method.as_deref().filter(|s| !s.trim().is_empty())?;
        match EndpointKey::new(method, url) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::warn!(requiring_endpoint = %url, error = %e, "Ignoring malformed requiring endpoint");
                None
            }
        }
    }
}

/// Backends the orchestrator works against.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub bus: Arc<dyn StatusBus>,
    pub downstream: Arc<dyn Downstream>,
}

/// Tuning taken from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub breaker: Settings,
    pub hydrate_timeout: Duration,
    pub scan_page_size: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &CascadeConfig) -> Self {
        Self {
            breaker: config.breaker.settings(),
            hydrate_timeout: Duration::from_millis(config.broker.hydrate_timeout_ms),
            scan_page_size: config.store.scan_page_size,
        }
    }
}

/// Entry point of the request path.
pub struct Orchestrator {
    registry: Arc<BreakerRegistry>,
    graph: Arc<DependencyGraph>,
    store: Arc<dyn StateStore>,
    bus: Arc<dyn StatusBus>,
    downstream: Arc<dyn Downstream>,
    policy: Arc<EndpointPolicy>,
    fallback: FallbackResolver,
    tasks: TaskPool,
    hydrate_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        policy: EndpointPolicy,
        settings: OrchestratorSettings,
        tasks: TaskPool,
        shutdown: ShutdownSignal,
    ) -> Self {
        let Collaborators {
            store,
            bus,
            downstream,
        } = collaborators;
        let policy = Arc::new(policy);

        let propagator = CascadePropagator::new(
            store.clone(),
            bus.clone(),
            policy.clone(),
            tasks.clone(),
            settings.breaker.open_timeout,
        );
        let graph = Arc::new(DependencyGraph::new(
            store.clone(),
            bus.clone(),
            propagator.clone(),
            tasks.clone(),
            shutdown,
            settings.scan_page_size,
        ));
        let registry = Arc::new(
            BreakerRegistry::new(settings.breaker).with_observer(Arc::new(propagator)),
        );
        let fallback = FallbackResolver::new(registry.clone(), store.clone(), downstream.clone());

        Self {
            registry,
            graph,
            store,
            bus,
            downstream,
            policy,
            fallback,
            tasks,
            hydrate_timeout: settings.hydrate_timeout,
        }
    }

    /// Handle one request.
    pub async fn handle(&self, request: CascadeRequest) -> Result<CascadeResponse, CascadeError> {
        let result = self.route(&request).await;
        metrics::record_request(match &result {
            Ok(_) => "success",
            Err(e) => e.outcome().as_str(),
        });
        result
    }

    async fn route(&self, request: &CascadeRequest) -> Result<CascadeResponse, CascadeError> {
        request.validate()?;
        let key = EndpointKey::new(&request.method, &request.url)?;

        if let Some(dependent) = request.requiring_key() {
            let graph = self.graph.clone();
            let dependency = key.clone();
            self.tasks.spawn("record-dependency", async move {
                graph.record_dependency(&dependent, &dependency).await.map(|_| ())
            });
        }

        if !self.graph.is_subscribed(&key) {
            self.hydrate(&key).await;
            self.graph.ensure_subscribed(&key);
        }

        if self.is_cached_open(&key).await {
            metrics::record_short_circuit("cache");
            return self.handle_open(&key, request).await;
        }

        let call = request.downstream();
        let downstream = self.downstream.clone();
        let result = self
            .registry
            .execute(&key, || async move { downstream.call(&call).await })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(ExecuteError::Open) => self.handle_open(&key, request).await,
            Err(ExecuteError::Failed(e)) => {
                tracing::warn!(endpoint = %key, error = %e, "Downstream call failed");
                Err(CascadeError::DownstreamExecutionFailed(e.to_string()))
            }
        }
    }

    /// Cache a status published before this process consumed `key`'s topic.
    async fn hydrate(&self, key: &EndpointKey) {
        let topic = naming::topic(key);
        match self.bus.subscribe(&topic, self.hydrate_timeout).await {
            Ok(record) => {
                if let Err(e) = cache_status(self.store.as_ref(), key, &record, now_millis()).await {
                    tracing::warn!(endpoint = %key, error = %e, "Failed to cache hydrated status");
                }
            }
            Err(BrokerError::NoStatus(_)) => {}
            Err(e) => {
                tracing::warn!(endpoint = %key, error = %e, "Failed to read initial status");
            }
        }
    }

    async fn is_cached_open(&self, key: &EndpointKey) -> bool {
        match self.store.get(&naming::status_key(key)).await {
            Ok(status) => status == State::Open.as_str(),
            Err(StoreError::KeyNotFound) => false,
            Err(e) => {
                tracing::warn!(endpoint = %key, error = %e, "Failed to read cached status, proceeding");
                false
            }
        }
    }

    async fn handle_open(
        &self,
        key: &EndpointKey,
        request: &CascadeRequest,
    ) -> Result<CascadeResponse, CascadeError> {
        let alternatives = self.policy.alternatives(key);
        if !alternatives.is_empty() {
            return self
                .fallback
                .resolve(alternatives, &request.url, &request.body, &request.header)
                .await;
        }

        if self.policy.is_exception(key) {
            tracing::debug!(endpoint = %key, "Exception endpoint, calling past open breaker");
            return self
                .downstream
                .call(&request.downstream())
                .await
                .map_err(|e| CascadeError::DownstreamExecutionFailed(e.to_string()));
        }

        tracing::debug!(endpoint = %key, "Circuit breaker open, rejecting request");
        Err(CascadeError::CircuitBreakerOpen(key.to_string()))
    }

    /// Start consumers for configured alternatives and persisted dependents.
    ///
    /// Returns the number of consumers started.
    pub async fn warm_up(&self) -> Result<usize, CascadeError> {
        let mut started = 0;
        for alt in self.policy.all_alternatives() {
            if self.graph.ensure_subscribed(&alt.key) {
                started += 1;
            }
        }
        started += self.graph.rehydrate().await?;
        Ok(started)
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    pub fn policy(&self) -> &EndpointPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InMemoryBus, StatusRecord};
    use crate::config::schema::{AlternativeEndpointConfig, EndpointConfig};
    use crate::lifecycle::Shutdown;
    use crate::service::client::DownstreamError;
    use crate::store::testing::FailingStore;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fixed status per URL prefix; 5xx becomes a failure. Unscripted URLs answer 200.
    #[derive(Default)]
    struct ScriptedDownstream {
        statuses: Mutex<HashMap<String, u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedDownstream {
        fn answer(&self, url: &str, status: u16) {
            self.statuses.lock().unwrap().insert(url.to_string(), status);
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|called| called.starts_with(url))
                .count()
        }
    }

    #[async_trait]
    impl Downstream for ScriptedDownstream {
        async fn call(&self, request: &DownstreamRequest) -> Result<CascadeResponse, DownstreamError> {
            self.calls.lock().unwrap().push(request.url.clone());
            let status = self
                .statuses
                .lock()
                .unwrap()
                .iter()
                .find(|(prefix, _)| request.url.starts_with(prefix.as_str()))
                .map(|(_, status)| *status)
                .unwrap_or(200);
            if status >= 500 {
                return Err(DownstreamError::ServerError { status });
            }
            Ok(CascadeResponse {
                status: format!("{} OK", status),
                status_code: status,
                proto: "HTTP/1.1".into(),
                proto_major: 1,
                proto_minor: 1,
                body: request.url.clone().into_bytes(),
                ..Default::default()
            })
        }
    }

    struct Process {
        orchestrator: Orchestrator,
        downstream: Arc<ScriptedDownstream>,
        _shutdown: Shutdown,
    }

    fn process(store: Arc<dyn StateStore>, bus: InMemoryBus, policy: EndpointPolicy) -> Process {
        let downstream = Arc::new(ScriptedDownstream::default());
        let shutdown = Shutdown::new();
        let orchestrator = Orchestrator::new(
            Collaborators {
                store,
                bus: Arc::new(bus),
                downstream: downstream.clone(),
            },
            policy,
            OrchestratorSettings {
                breaker: Settings {
                    failure_threshold: 5,
                    open_timeout: Duration::from_secs(60),
                    interval: None,
                },
                hydrate_timeout: Duration::from_millis(10),
                scan_page_size: 15,
            },
            TaskPool::new(64),
            shutdown.signal(),
        );
        Process {
            orchestrator,
            downstream,
            _shutdown: shutdown,
        }
    }

    fn get(url: &str) -> CascadeRequest {
        CascadeRequest {
            method: "GET".into(),
            url: url.into(),
            ..Default::default()
        }
    }

    fn get_for(url: &str, requiring: &str) -> CascadeRequest {
        CascadeRequest {
            requiring_endpoint: Some(requiring.into()),
            requiring_method: Some("GET".into()),
            ..get(url)
        }
    }

    fn policy(config: CascadeConfig) -> EndpointPolicy {
        EndpointPolicy::from_config(&config).unwrap()
    }

    fn with_alternative() -> EndpointPolicy {
        policy(CascadeConfig {
            alternative_endpoints: vec![AlternativeEndpointConfig {
                endpoint: "http://a/x".into(),
                method: "GET".into(),
                alternatives: vec![EndpointConfig {
                    endpoint: "http://alt/x".into(),
                    method: "GET".into(),
                }],
            }],
            ..CascadeConfig::default()
        })
    }

    async fn trip(p: &Process, url: &str) {
        p.downstream.answer(url, 503);
        for _ in 0..5 {
            let err = p.orchestrator.handle(get(url)).await.unwrap_err();
            assert!(matches!(err, CascadeError::DownstreamExecutionFailed(_)));
        }
    }

    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let p = process(Arc::new(InMemoryStore::new()), InMemoryBus::new(), EndpointPolicy::default());

        let missing = p.orchestrator.handle(get("")).await.unwrap_err();
        assert!(matches!(missing, CascadeError::Validation(_)));

        let malformed = p.orchestrator.handle(get("http://exa mple.com/x")).await.unwrap_err();
        assert!(matches!(malformed, CascadeError::InvalidUrl { .. }));
        assert!(p.downstream.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sixth_call_short_circuits() {
        let p = process(Arc::new(InMemoryStore::new()), InMemoryBus::new(), EndpointPolicy::default());
        trip(&p, "http://a/x").await;

        let err = p.orchestrator.handle(get("http://a/x")).await.unwrap_err();
        assert!(matches!(err, CascadeError::CircuitBreakerOpen(ref k) if k == "GET:a/x"));
        assert_eq!(p.downstream.calls_to("http://a/x"), 5);
    }

    #[tokio::test]
    async fn test_success_passes_response_through() {
        let p = process(Arc::new(InMemoryStore::new()), InMemoryBus::new(), EndpointPolicy::default());
        let response = p.orchestrator.handle(get("http://a/x")).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"http://a/x");
        assert!(!response.is_from_alternative_endpoint);
        assert!(p.orchestrator.graph().is_subscribed(&EndpointKey::new("GET", "http://a/x").unwrap()));
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let p = process(Arc::new(InMemoryStore::new()), InMemoryBus::new(), EndpointPolicy::default());
        p.downstream.answer("http://a/x", 404);
        for _ in 0..10 {
            let response = p.orchestrator.handle(get("http://a/x")).await.unwrap();
            assert_eq!(response.status_code, 404);
        }
    }

    #[tokio::test]
    async fn test_dependent_learns_of_trip_through_shared_store() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let a = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());
        let b = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());

        // b/y declares a/x as a requirement.
        a.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        a.orchestrator.tasks().wait_idle().await;

        trip(&a, "http://a/x").await;
        a.orchestrator.tasks().wait_idle().await;

        let status = store.get("status:GET:b/y").await.unwrap();
        assert_eq!(status, "open");
        assert!(store.ttl("status:GET:b/y").unwrap() <= Duration::from_secs(60));

        let err = b.orchestrator.handle(get("http://b/y")).await.unwrap_err();
        assert!(matches!(err, CascadeError::CircuitBreakerOpen(_)));
        assert_eq!(b.downstream.calls_to("http://a/x"), 0);
        assert_eq!(b.downstream.calls_to("http://b/y"), 0);
    }

    #[tokio::test]
    async fn test_dependent_learns_of_trip_through_bus() {
        let bus = InMemoryBus::new();
        let a_store = InMemoryStore::new();
        let b_store = InMemoryStore::new();
        let a = process(Arc::new(a_store.clone()), bus.clone(), EndpointPolicy::default());
        let b = process(Arc::new(b_store.clone()), bus.clone(), EndpointPolicy::default());

        // Process B serves b/y and so consumes its topic.
        b.orchestrator.handle(get("http://b/y")).await.unwrap();
        let topic = naming::topic(&EndpointKey::new("GET", "http://b/y").unwrap());
        eventually(|| {
            let bus = bus.clone();
            let topic = topic.clone();
            async move { bus.consumers(&topic) == 1 }
        })
        .await;

        a.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        a.orchestrator.tasks().wait_idle().await;
        trip(&a, "http://a/x").await;

        eventually(|| {
            let b_store = b_store.clone();
            async move { b_store.get("status:GET:b/y").await.is_ok() }
        })
        .await;
        assert!(b_store.ttl("status:GET:b/y").unwrap() <= Duration::from_secs(60));

        let err = b.orchestrator.handle(get("http://b/y")).await.unwrap_err();
        assert!(matches!(err, CascadeError::CircuitBreakerOpen(_)));
        assert_eq!(b.downstream.calls_to("http://b/y"), 1);
    }

    #[tokio::test]
    async fn test_open_status_reaches_second_hop() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let p = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());

        // b/y requires a/x, c/z requires b/y.
        p.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        p.orchestrator.handle(get_for("http://b/y", "http://c/z")).await.unwrap();
        p.orchestrator.tasks().wait_idle().await;

        let b_topic = naming::topic(&EndpointKey::new("GET", "http://b/y").unwrap());
        let c_topic = naming::topic(&EndpointKey::new("GET", "http://c/z").unwrap());
        eventually(|| {
            let bus = bus.clone();
            let (b_topic, c_topic) = (b_topic.clone(), c_topic.clone());
            async move { bus.consumers(&b_topic) == 1 && bus.consumers(&c_topic) == 1 }
        })
        .await;

        trip(&p, "http://a/x").await;

        eventually(|| {
            let store = store.clone();
            async move { store.get("status:GET:c/z").await.is_ok() }
        })
        .await;
        p.orchestrator.tasks().wait_idle().await;
        let a_record = bus.published(&naming::topic(&EndpointKey::new("GET", "http://a/x").unwrap()));
        let c_records = bus.published(&c_topic);
        assert!(!c_records.is_empty());
        assert_eq!(c_records[0].emitted_at, a_record[0].emitted_at);
        assert!(store.ttl("status:GET:c/z").unwrap() <= Duration::from_secs(60));

        let err = p.orchestrator.handle(get("http://c/z")).await.unwrap_err();
        assert!(matches!(err, CascadeError::CircuitBreakerOpen(_)));
        assert_eq!(p.downstream.calls_to("http://c/z"), 0);
        assert_eq!(p.downstream.calls_to("http://b/y"), 1);
    }

    #[tokio::test]
    async fn test_dependency_cycle_settles() {
        let store = InMemoryStore::new();
        let bus = InMemoryBus::new();
        let p = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());

        p.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        p.orchestrator.handle(get_for("http://b/y", "http://a/x")).await.unwrap();
        p.orchestrator.tasks().wait_idle().await;

        let a_topic = naming::topic(&EndpointKey::new("GET", "http://a/x").unwrap());
        let b_topic = naming::topic(&EndpointKey::new("GET", "http://b/y").unwrap());
        eventually(|| {
            let bus = bus.clone();
            let (a_topic, b_topic) = (a_topic.clone(), b_topic.clone());
            async move { bus.consumers(&a_topic) == 1 && bus.consumers(&b_topic) == 1 }
        })
        .await;

        trip(&p, "http://a/x").await;
        p.orchestrator.tasks().wait_idle().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        p.orchestrator.tasks().wait_idle().await;

        let settled = bus.published(&a_topic).len() + bus.published(&b_topic).len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.published(&a_topic).len() + bus.published(&b_topic).len(), settled);
        assert!(settled <= 4);
        assert_eq!(store.get("status:GET:b/y").await.unwrap(), "open");
    }

    #[tokio::test]
    async fn test_status_published_before_first_request_is_hydrated() {
        let bus = InMemoryBus::new();
        let store = InMemoryStore::new();
        let p = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());
        let key = EndpointKey::new("GET", "http://b/y").unwrap();

        bus.publish(
            &naming::topic(&key),
            &StatusRecord::new(key.as_str(), State::Open, Duration::from_secs(60)),
        )
        .await
        .unwrap();

        let err = p.orchestrator.handle(get("http://b/y")).await.unwrap_err();
        assert!(matches!(err, CascadeError::CircuitBreakerOpen(_)));
        assert_eq!(p.downstream.calls_to("http://b/y"), 0);
    }

    #[tokio::test]
    async fn test_expired_status_is_not_hydrated() {
        let bus = InMemoryBus::new();
        let p = process(Arc::new(InMemoryStore::new()), bus.clone(), EndpointPolicy::default());
        let key = EndpointKey::new("GET", "http://b/y").unwrap();
        let stale = StatusRecord {
            endpoint: key.as_str().to_string(),
            status: State::Open,
            timeout_seconds: 60,
            emitted_at: now_millis() - 61_000,
        };
        bus.publish(&naming::topic(&key), &stale).await.unwrap();

        assert!(p.orchestrator.handle(get("http://b/y")).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let p = process(Arc::new(FailingStore), InMemoryBus::new(), EndpointPolicy::default());
        let response = p.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn test_cache_miss_proceeds_to_call() {
        let p = process(Arc::new(InMemoryStore::new()), InMemoryBus::new(), EndpointPolicy::default());
        assert!(p.orchestrator.handle(get("http://a/x")).await.is_ok());
        assert_eq!(p.downstream.calls_to("http://a/x"), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let bus = InMemoryBus::new();
        let store = InMemoryStore::new();
        let p = process(Arc::new(store.clone()), bus.clone(), EndpointPolicy::default());
        p.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        bus.set_publish_failure(true);

        trip(&p, "http://a/x").await;
        p.orchestrator.tasks().wait_idle().await;
        assert!(p.orchestrator.tasks().stats().failed >= 2);

        // Cache writes still landed and unrelated traffic is unaffected.
        assert_eq!(store.get("status:GET:b/y").await.unwrap(), "open");
        assert!(p.orchestrator.handle(get("http://c/z")).await.is_ok());
    }

    #[tokio::test]
    async fn test_healthy_alternative_serves_and_suppresses_fan_out() {
        let bus = InMemoryBus::new();
        let store = InMemoryStore::new();
        let p = process(Arc::new(store.clone()), bus.clone(), with_alternative());

        p.orchestrator.handle(get_for("http://a/x", "http://b/y")).await.unwrap();
        trip(&p, "http://a/x").await;
        p.orchestrator.tasks().wait_idle().await;

        // Own status is cached, the dependent hears nothing.
        assert_eq!(store.get("status:GET:a/x").await.unwrap(), "open");
        assert!(store.get("status:GET:b/y").await.is_err());
        let b_topic = naming::topic(&EndpointKey::new("GET", "http://b/y").unwrap());
        assert!(bus.published(&b_topic).is_empty());

        let response = p.orchestrator.handle(get("http://a/x?id=3")).await.unwrap();
        assert!(response.is_from_alternative_endpoint);
        assert_eq!(response.body, b"http://alt/x?id=3");
        assert_eq!(p.downstream.calls_to("http://a/x"), 6);
    }

    #[tokio::test]
    async fn test_open_alternative_fails_the_request() {
        let store = InMemoryStore::new();
        let p = process(Arc::new(store.clone()), InMemoryBus::new(), with_alternative());
        store.set("status:GET:a/x", "open").await.unwrap();
        store.set("status:GET:alt/x", "open").await.unwrap();

        let err = p.orchestrator.handle(get("http://a/x")).await.unwrap_err();
        assert!(matches!(err, CascadeError::AlternativeExecutionFailed));
        assert!(p.downstream.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exception_calls_past_open_status() {
        let store = InMemoryStore::new();
        let exceptions = policy(CascadeConfig {
            exceptions: vec![EndpointConfig {
                endpoint: "http://a/x".into(),
                method: "GET".into(),
            }],
            ..CascadeConfig::default()
        });
        let p = process(Arc::new(store.clone()), InMemoryBus::new(), exceptions);
        store.set("status:GET:a/x", "open").await.unwrap();

        let response = p.orchestrator.handle(get("http://a/x")).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(!response.is_from_alternative_endpoint);
    }

    #[tokio::test]
    async fn test_warm_up_subscribes_alternatives_and_dependents() {
        let store = InMemoryStore::new();
        store
            .add_members("requirings:GET:a/x", &["GET:b/y".to_string()])
            .await
            .unwrap();
        let p = process(Arc::new(store), InMemoryBus::new(), with_alternative());

        assert_eq!(p.orchestrator.warm_up().await.unwrap(), 2);
        let subscribed: Vec<String> = p
            .orchestrator
            .graph()
            .subscriptions()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(subscribed, vec!["GET:alt/x", "GET:b/y"]);
    }
}
