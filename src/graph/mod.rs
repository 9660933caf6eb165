//! Dependency graph subsystem.
//!
//! # Data Flow
//! ```text
//! request with requiring endpoint
//!     → manager.rs record_dependency (SADD requirings:<dependency> <dependent>)
//!     → new member? → ensure_subscribed(dependent) → status consumer on topic(dependent)
//!
//! breaker trips on <dependency>
//!     → manager.rs list_dependents (SMEMBERS requirings:<dependency>)
//!
//! status received on topic(dependent)
//!     → consumer relays to load_dependents(dependent), one hop further
//! ```

pub mod manager;

pub use manager::{load_dependents, DependencyGraph};
