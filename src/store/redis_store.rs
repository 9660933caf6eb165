//! Redis / KVRocks state store.
//!
//! Commands go through a [`ConnectionManager`], which reconnects on its own;
//! a failed command surfaces as `StoreError::Backend` and the caller decides
//! whether to fail open.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;

use super::{StateStore, StoreError, StoreResult};

/// [`StateStore`] backed by a Redis-protocol server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(StoreError::backend)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::backend)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;

        tracing::info!(url = %redact(url), "Connected to state store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let millis = ttl.as_millis() as u64;
        if millis == 0 {
            return Err(StoreError::Backend("expiry must be positive".to_string()));
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        value.ok_or(StoreError::KeyNotFound)
    }

    async fn add_members(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(members)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(added)
    }

    async fn members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(members)
    }

    async fn is_members(&self, key: &str, candidates: &[String]) -> StoreResult<Vec<bool>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let flags: Vec<bool> = redis::cmd("SMISMEMBER")
            .arg(key)
            .arg(candidates)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(flags)
    }

    async fn scan(&self, pattern: &str, page_size: usize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, page): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(page_size.max(1))
                .query_async(&mut conn)
                .await
                .map_err(StoreError::backend)?;
            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across pages.
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Hide credentials in a connection URL before logging it.
pub(crate) fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid url>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_password() {
        assert_eq!(
            redact("redis://:secret@localhost:6379/0"),
            "redis://:***@localhost:6379/0"
        );
        assert_eq!(redact("redis://localhost:6379"), "redis://localhost:6379");
        assert_eq!(redact("not a url"), "<invalid url>");
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        assert!(matches!(
            RedisStore::connect("http//nope").await,
            Err(StoreError::Backend(_))
        ));
    }
}
