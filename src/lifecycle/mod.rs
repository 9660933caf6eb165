//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Connect store and bus → Build orchestrator → Warm up
//!     subscriptions → Start listener
//!
//! Detached work (tasks.rs):
//!     Propagation, graph writes, consumers → bounded pool off the request path
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/SIGTERM → trigger → server drains, consumer loops exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then backends, then listeners
//! - Fail fast: a backend that cannot be reached at startup is fatal
//! - Detached tasks never inherit a request's cancellation

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod tasks;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use tasks::{TaskPool, TaskStats};
