//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, timeout, trace, request ID)
//!     → request.rs (JSON envelope → CascadeRequest)
//!     → service::Orchestrator::handle
//!     → response.rs (CascadeResponse / CascadeError → JSON)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
