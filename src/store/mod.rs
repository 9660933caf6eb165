//! Shared state store subsystem.
//!
//! # Data Flow
//! ```text
//! orchestrator gate   → get(status:<k>)
//! consumer / cascade  → set_with_expiry(status:<k>, status, ttl)
//! dependency graph    → add_members(requirings:<k>), members(), scan()
//! ```
//!
//! # Design Decisions
//! - Every operation is individually atomic at the store; no cross-key locking
//! - A missing key is `StoreError::KeyNotFound`, which callers treat as a miss
//! - `memory.rs` is the single-process backend and the test fixture
//! - `redis_store.rs` talks to Redis or KVRocks through a connection manager

pub mod memory;
pub mod redis_store;

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// Errors returned by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist or has expired.
    #[error("key not found")]
    KeyNotFound,

    /// The backend failed or returned an unexpected reply.
    #[error("state store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value store with TTL-bearing scalars and unordered sets.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Set a value without expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Set a value that expires after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Read a value. Missing or expired keys yield `KeyNotFound`.
    async fn get(&self, key: &str) -> StoreResult<String>;

    /// Add members to a set, returning how many were not already present.
    async fn add_members(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// All members of a set. A missing set is empty.
    async fn members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Membership of each candidate, in order.
    async fn is_members(&self, key: &str, candidates: &[String]) -> StoreResult<Vec<bool>>;

    /// Every key matching a glob `pattern`, fetched `page_size` at a time.
    async fn scan(&self, pattern: &str, page_size: usize) -> StoreResult<Vec<String>>;
}
