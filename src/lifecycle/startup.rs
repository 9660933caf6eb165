//! Startup orchestration.
//!
//! # Responsibilities
//! - Connect the configured store and bus backends
//! - Build the downstream client and the orchestrator
//! - Start status consumers for alternatives and persisted dependents
//! - Pick a consumer group that survives restarts
//!
//! # Design Decisions
//! - Fail fast: a backend that cannot be reached at startup is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready), see `main.rs`

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{Shutdown, TaskPool};
use crate::broker::redis_streams::StreamOptions;
use crate::broker::{BrokerError, DeliveryPolicy, InMemoryBus, RedisStreamBus, StatusBus};
use crate::config::{BackendKind, CascadeConfig, EndpointPolicy};
use crate::error::CascadeError;
use crate::service::{Collaborators, DownstreamError, HttpDownstream, Orchestrator, OrchestratorSettings};
use crate::store::{InMemoryStore, RedisStore, StateStore, StoreError};

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{0} backend is redis but no url is configured")]
    MissingUrl(&'static str),

    #[error("failed to connect state store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to connect status bus: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to build downstream client: {0}")]
    Downstream(#[from] DownstreamError),

    #[error("invalid endpoint configuration: {0}")]
    Policy(#[from] CascadeError),

    #[error("broker.consumer_group is empty and no hostname is available to derive one")]
    NoConsumerGroup,
}

/// Build a ready-to-serve orchestrator from `config`.
pub async fn bootstrap(
    config: &CascadeConfig,
    shutdown: &Shutdown,
) -> Result<Arc<Orchestrator>, StartupError> {
    let policy = EndpointPolicy::from_config(config)?;
    let store = connect_store(config).await?;
    let bus = connect_bus(config).await?;
    let downstream = HttpDownstream::new(
        Duration::from_secs(config.downstream.timeout_secs),
        Duration::from_secs(config.downstream.connect_timeout_secs),
    )?;

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            store,
            bus,
            downstream: Arc::new(downstream),
        },
        policy,
        OrchestratorSettings::from_config(config),
        TaskPool::new(config.tasks.max_in_flight),
        shutdown.signal(),
    ));

    // Rehydration failure leaves consumers to be started lazily by traffic.
    match orchestrator.warm_up().await {
        Ok(started) => tracing::info!(consumers = started, "Status consumers started"),
        Err(e) => tracing::error!(error = %e, "Failed to rehydrate status consumers"),
    }

    Ok(orchestrator)
}

async fn connect_store(config: &CascadeConfig) -> Result<Arc<dyn StateStore>, StartupError> {
    match config.store.backend {
        BackendKind::Memory => {
            tracing::warn!("Using in-memory state store, breaker status is not shared between instances");
            Ok(Arc::new(InMemoryStore::new()))
        }
        BackendKind::Redis => {
            let url = config.store.url.as_deref().ok_or(StartupError::MissingUrl("store"))?;
            Ok(Arc::new(RedisStore::connect(url).await?))
        }
    }
}

async fn connect_bus(config: &CascadeConfig) -> Result<Arc<dyn StatusBus>, StartupError> {
    let retry_interval = Duration::from_secs(config.broker.retry_interval_secs);
    let delivery = DeliveryPolicy {
        max_backoff_ms: retry_interval.as_millis() as u64,
        ..DeliveryPolicy::default()
    };

    match config.broker.backend {
        BackendKind::Memory => {
            tracing::warn!("Using in-memory status bus, breaker status is not shared between instances");
            Ok(Arc::new(
                InMemoryBus::with_policy(delivery).with_max_len(config.broker.stream_max_len),
            ))
        }
        BackendKind::Redis => {
            let url = config.broker.url.as_deref().ok_or(StartupError::MissingUrl("broker"))?;
            let options = StreamOptions {
                group: consumer_group(&config.broker.consumer_group, hostname().as_deref())?,
                max_len: config.broker.stream_max_len,
                block: Duration::from_millis(config.broker.block_ms),
                retry_interval,
                delivery,
            };
            tracing::info!(group = %options.group, "Joining status streams");
            Ok(Arc::new(RedisStreamBus::connect(url, options).await?))
        }
    }
}

/// The configured group, or one derived from the host name.
///
/// Every instance needs its own group to see every record on a topic, and
/// the same group across restarts to get its unacknowledged records back.
fn consumer_group(configured: &str, host: Option<&str>) -> Result<String, StartupError> {
    let trimmed = configured.trim();
    if !trimmed.is_empty() {
        return Ok(trimmed.to_string());
    }
    match host.map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => Ok(format!("cascade-breaker-{}", host)),
        None => Err(StartupError::NoConsumerGroup),
    }
}

/// `HOSTNAME`, falling back to `/etc/hostname`.
fn hostname() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
}
