//! Cascading circuit breaker library.

pub mod endpoint;
pub mod error;

// Breaker core
pub mod breaker;
pub mod cascade;
pub mod graph;
pub mod service;

// Shared backends
pub mod broker;
pub mod store;

// Transport
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::CascadeConfig;
pub use error::CascadeError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use service::Orchestrator;
