//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::breaker::Settings;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CascadeConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Breaker tuning shared by every endpoint.
    pub breaker: BreakerConfig,

    /// Outgoing call settings.
    pub downstream: DownstreamConfig,

    /// Shared state store backend.
    pub store: StoreConfig,

    /// Status bus backend.
    pub broker: BrokerConfig,

    /// Detached task pool.
    pub tasks: TaskConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Fallback targets per primary endpoint, tried in declared order.
    pub alternative_endpoints: Vec<AlternativeEndpointConfig>,

    /// Endpoints that bypass breaker gating when their breaker is open.
    pub exceptions: Vec<EndpointConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:5320").
    pub bind_address: String,

    /// Whole-request timeout for the API in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5320".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Trip when consecutive failures reach this value.
    pub failure_threshold: u32,

    /// Seconds spent Open before a trial call. Also the TTL of every
    /// cached or propagated status.
    pub open_timeout_secs: u64,

    /// Closed-state window in seconds after which counts reset (0 = never).
    pub interval_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 60,
            interval_secs: 0,
        }
    }
}

impl BreakerConfig {
    pub fn settings(&self) -> Settings {
        Settings {
            failure_threshold: self.failure_threshold,
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            interval: (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs)),
        }
    }
}

/// Downstream HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

/// Which implementation backs the store or the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process; state is not shared between instances.
    #[default]
    Memory,
    /// Redis protocol (Redis, KVRocks).
    Redis,
}

/// Shared state store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,

    /// Connection URL, required for the redis backend.
    pub url: Option<String>,

    /// Keys fetched per SCAN page during startup rehydration.
    pub scan_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            url: None,
            scan_page_size: 15,
        }
    }
}

/// Status bus configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BackendKind,

    /// Connection URL, required for the redis backend.
    pub url: Option<String>,

    /// Consumer group of this instance, kept across restarts. Empty derives
    /// `cascade-breaker-<hostname>`.
    pub consumer_group: String,

    /// Wait for the one-shot status read on first request, in milliseconds.
    pub hydrate_timeout_ms: u64,

    /// Pause before resubscribing after a consumer failure, in seconds.
    /// Also caps redelivery backoff.
    pub retry_interval_secs: u64,

    /// Approximate number of records retained per topic.
    pub stream_max_len: usize,

    /// Blocking read window of a consumer, in milliseconds.
    pub block_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            url: None,
            consumer_group: String::new(),
            hydrate_timeout_ms: 100,
            retry_interval_secs: 10,
            stream_max_len: 1000,
            block_ms: 5000,
        }
    }
}

/// Detached task pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Maximum detached tasks running at once.
    pub max_in_flight: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin API under `/admin` on the main listener.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// An endpoint as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// URL of the endpoint.
    pub endpoint: String,

    /// HTTP method (any case).
    pub method: String,
}

/// A primary endpoint and its ordered fallbacks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlternativeEndpointConfig {
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub alternatives: Vec<EndpointConfig>,
}
