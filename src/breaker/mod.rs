//! Circuit breaker subsystem.
//!
//! # Data Flow
//! ```text
//! orchestrator / fallback resolver
//!     → registry.rs (get-or-create breaker for the endpoint, execute call)
//!     → state.rs (admit, record outcome, transition)
//!     → TransitionObserver (cascade propagator)
//! ```
//!
//! # Design Decisions
//! - One breaker per endpoint key, kept for the process lifetime
//! - The state machine knows nothing about propagation; it only emits
//!   transitions

pub mod registry;
pub mod state;

pub use registry::{BreakerRegistry, ExecuteError, TransitionObserver};
pub use state::{CircuitBreaker, Counts, Settings, Snapshot, State, Transition};
