//! In-process state store.
//!
//! Backs single-instance deployments and every test that needs a shared
//! store between two orchestrators in the same process.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{StateStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// DashMap-backed [`StateStore`]. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    values: Arc<DashMap<String, Entry>>,
    sets: Arc<DashMap<String, HashSet<String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a value, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.values
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        if ttl.is_zero() {
            return Err(StoreError::Backend("expiry must be positive".to_string()));
        }
        self.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let now = Instant::now();
        if let Some(entry) = self.values.get(key) {
            if entry.is_live(now) {
                return Ok(entry.value.clone());
            }
        }
        self.values.remove_if(key, |_, e| !e.is_live(now));
        Err(StoreError::KeyNotFound)
    }

    async fn add_members(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        let mut set = self.sets.entry(key.to_string()).or_default();
        let mut added = 0;
        for member in members {
            if set.insert(member.clone()) {
                added += 1;
            }
        }
        Ok(added)
    }

    async fn members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn is_members(&self, key: &str, candidates: &[String]) -> StoreResult<Vec<bool>> {
        let set = self.sets.get(key);
        Ok(candidates
            .iter()
            .map(|c| set.as_ref().is_some_and(|s| s.contains(c)))
            .collect())
    }

    async fn scan(&self, pattern: &str, _page_size: usize) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|e| e.value().is_live(now))
            .map(|e| e.key().clone())
            .chain(self.sets.iter().map(|e| e.key().clone()))
            .filter(|k| glob_match(pattern, k))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Glob matching for `*` and `?`, enough for the key patterns we scan with.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
