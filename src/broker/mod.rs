//! Status bus subsystem.
//!
//! # Data Flow
//! ```text
//! cascade propagator → publish(topic(d), StatusRecord)
//!                           │
//!                           ▼
//!                      status bus (per-endpoint topic)
//!                           │
//!     subscribe_async ◀─────┴─────▶ subscribe (one-shot, bounded wait)
//!     (consumer loop)                (first-request hydration)
//! ```
//!
//! # Design Decisions
//! - Delivery is at-least-once; a record is acknowledged only after its
//!   handler returns `Ok`
//! - A failing handler is retried with backoff, a record that cannot be
//!   decoded is logged and acknowledged
//! - Consumers start at the tail: they see records published after they
//!   subscribed (plus their own unacknowledged backlog)

pub mod memory;
pub mod redis_streams;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::State;
use crate::error::CascadeError;
use crate::lifecycle::ShutdownSignal;
use crate::resilience::backoff::calculate_backoff;

pub use memory::InMemoryBus;
pub use redis_streams::RedisStreamBus;

/// Errors returned by a [`StatusBus`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to publish to {topic}: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("failed to subscribe to {topic}: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Nothing was published on the topic within the wait window.
    #[error("no status available on {0}")]
    NoStatus(String),

    #[error("malformed status record: {0}")]
    Codec(String),
}

/// Breaker status notification carried on the bus and cached in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    /// Endpoint the status applies to (the receiving dependent).
    pub endpoint: String,
    pub status: State,
    pub timeout_seconds: u64,
    /// Unix epoch milliseconds.
    pub emitted_at: u64,
}

impl StatusRecord {
    /// A record stamped with the current wall-clock time.
    pub fn new(endpoint: impl Into<String>, status: State, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            status,
            timeout_seconds: timeout.as_secs(),
            emitted_at: now_millis(),
        }
    }

    /// Unix millisecond timestamp after which the record is void.
    pub fn expires_at(&self) -> u64 {
        self.emitted_at
            .saturating_add(self.timeout_seconds.saturating_mul(1000))
    }

    /// Time left before expiry, or `None` once `emitted_at + timeout <= now`.
    pub fn remaining(&self, now_ms: u64) -> Option<Duration> {
        let expires_at = self.expires_at();
        if expires_at <= now_ms {
            return None;
        }
        Some(Duration::from_millis(expires_at - now_ms))
    }

    pub fn encode(&self) -> Result<String, BrokerError> {
        serde_json::to_string(self).map_err(|e| BrokerError::Codec(e.to_string()))
    }

    pub fn decode(raw: &str) -> Result<Self, BrokerError> {
        serde_json::from_str(raw).map_err(|e| BrokerError::Codec(e.to_string()))
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Receives records from a subscription.
#[async_trait]
pub trait StatusHandler: Send + Sync {
    /// Process one record. Returning `Err` leaves it unacknowledged.
    async fn handle(&self, record: StatusRecord) -> Result<(), CascadeError>;
}

/// Topic-based publish/subscribe for breaker status records.
#[async_trait]
pub trait StatusBus: Send + Sync {
    async fn publish(&self, topic: &str, record: &StatusRecord) -> Result<(), BrokerError>;

    /// Consume `topic` until shutdown, passing each record to `handler`.
    ///
    /// Only returns once `shutdown` fires. Connection failures are retried
    /// internally.
    async fn subscribe_async(
        &self,
        topic: &str,
        handler: Arc<dyn StatusHandler>,
        shutdown: ShutdownSignal,
    );

    /// The latest record on `topic`, waiting up to `wait` for one to appear.
    async fn subscribe(&self, topic: &str, wait: Duration) -> Result<StatusRecord, BrokerError>;
}

/// Redelivery policy applied by bus implementations.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryPolicy {
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            base_backoff_ms: 100,
            max_backoff_ms: 10_000,
        }
    }
}

/// Decode one payload and hand it to `handler` until it succeeds.
///
/// Returns `true` when the entry may be acknowledged, `false` when shutdown
/// interrupted redelivery and the entry must stay pending.
pub(crate) async fn deliver(
    topic: &str,
    payload: &str,
    handler: &dyn StatusHandler,
    policy: DeliveryPolicy,
    shutdown: &mut ShutdownSignal,
) -> bool {
    let record = match StatusRecord::decode(payload) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(topic = %topic, error = %e, "Dropping undecodable status record");
            return true;
        }
    };

    let mut attempt: u32 = 0;
    loop {
        match handler.handle(record.clone()).await {
            Ok(()) => return true,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay =
                    calculate_backoff(attempt, policy.base_backoff_ms, policy.max_backoff_ms);
                tracing::warn!(
                    topic = %topic,
                    endpoint = %record.endpoint,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Status handler failed, will redeliver"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => return false,
                }
            }
        }
    }
}
