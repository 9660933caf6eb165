//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → CascadeConfig (validated, immutable)
//!     → policy.rs (normalized alternatives / exceptions)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod policy;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use policy::{Alternative, EndpointPolicy};
pub use schema::{BackendKind, CascadeConfig, LogFormat};
