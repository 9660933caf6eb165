//! Endpoint identity subsystem.
//!
//! # Data Flow
//! ```text
//! request (method, url)
//!     → key.rs (normalize to METHOD:host/path)
//!     → naming.rs (status key, requirings key, topic)
//!     → breaker registry / state store / status bus
//! ```
//!
//! # Design Decisions
//! - Two requests that should share breaker state normalize to the same key
//! - Config entries are normalized with the same function as live requests

pub mod key;
pub mod naming;

pub use key::EndpointKey;
