//! Resilience helpers shared by the bus consumers.
//!
//! # Data Flow
//! ```text
//! handler error / lost connection
//!     → backoff.rs (exponential delay with jitter)
//!     → retry delivery or resubscribe
//! ```

pub mod backoff;
