//! Cascade subsystem.
//!
//! # Data Flow
//! ```text
//! process A                                     process B
//! breaker E → Open
//!     → propagator.rs                           consumer.rs (topic of D)
//!         → publish topic(D) ─────────────────▶   → remaining TTL > 0?
//!         → SET status:<D> open PX timeout          → SET status:<D> PX remaining
//!                                                   → ack
//! ```
//!
//! # Design Decisions
//! - Only Open transitions propagate; HalfOpen and Closed stay local and the
//!   cached Open status simply expires
//! - Each publish and each cache write is its own detached task
//! - Errors are logged and counted, never returned to a caller

pub mod consumer;
pub mod propagator;

pub use consumer::{cache_status, StatusConsumer};
pub use propagator::CascadePropagator;
