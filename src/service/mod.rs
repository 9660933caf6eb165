//! Request service.
//!
//! # Data Flow
//! ```text
//! transport → orchestrator.rs handle(request)
//!                 → cached status / breaker gate
//!                 → client.rs Downstream::call
//!                 → breaker open? → fallback.rs resolve(alternatives)
//! ```

pub mod client;
pub mod fallback;
pub mod orchestrator;

pub use client::{CascadeResponse, Downstream, DownstreamError, DownstreamRequest, HttpDownstream};
pub use fallback::FallbackResolver;
pub use orchestrator::{CascadeRequest, Collaborators, Orchestrator, OrchestratorSettings};
