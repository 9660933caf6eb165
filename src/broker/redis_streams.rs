//! Redis Streams status bus.
//!
//! # Layout
//! ```text
//! topic            → stream key (XADD ... MAXLEN ~ n * payload <json>)
//! consumer group   → one per instance, kept across restarts, so every instance
//!                    sees every record and gets its pending ones back
//! acknowledgment   → XACK after the handler succeeds
//! ```
//!
//! On (re)subscribe the consumer first drains its own pending entries (id `0`),
//! which redelivers anything read but not acknowledged before a restart, then
//! switches to new entries (id `>`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamId, StreamRangeReply, StreamReadReply};
use redis::{Client, RedisError};

use super::{deliver, BrokerError, DeliveryPolicy, StatusBus, StatusHandler, StatusRecord};
use crate::lifecycle::ShutdownSignal;
use crate::store::redis_store::redact;

const PAYLOAD_FIELD: &str = "payload";
const READ_BATCH: usize = 16;

/// Tuning for [`RedisStreamBus`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Consumer group name; unique per instance and stable across restarts.
    pub group: String,
    /// Approximate per-topic retention.
    pub max_len: usize,
    /// How long one XREADGROUP call blocks.
    pub block: Duration,
    /// Pause between resubscribe attempts.
    pub retry_interval: Duration,
    pub delivery: DeliveryPolicy,
}

/// [`StatusBus`] over Redis Streams.
#[derive(Clone)]
pub struct RedisStreamBus {
    client: Client,
    conn: ConnectionManager,
    options: StreamOptions,
}

impl RedisStreamBus {
    pub async fn connect(url: &str, options: StreamOptions) -> Result<Self, BrokerError> {
        let client = Client::open(url).map_err(|e| BrokerError::SubscribeFailed {
            topic: String::new(),
            reason: e.to_string(),
        })?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BrokerError::SubscribeFailed {
                topic: String::new(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            url = %redact(url),
            group = %options.group,
            "Connected to status bus"
        );
        Ok(Self {
            client,
            conn,
            options,
        })
    }

    /// Blocking reads get their own connection so they never stall publishes.
    async fn dedicated_connection(&self) -> Result<MultiplexedConnection, RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
    ) -> Result<(), RedisError> {
        let created: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(&self.options.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn consume(
        &self,
        conn: &mut MultiplexedConnection,
        topic: &str,
        handler: &dyn StatusHandler,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(), RedisError> {
        let group = &self.options.group;
        let block_ms = self.options.block.as_millis() as u64;
        let mut draining_pending = true;

        loop {
            let start_id = if draining_pending { "0" } else { ">" };
            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP")
                .arg(group)
                .arg(group)
                .arg("COUNT")
                .arg(READ_BATCH)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(topic)
                .arg(start_id);
            let read = async {
                let reply: Option<StreamReadReply> = cmd.query_async(&mut *conn).await?;
                Ok::<_, RedisError>(reply)
            };

            let reply = tokio::select! {
                reply = read => reply?,
                _ = shutdown.recv() => return Ok(()),
            };

            let entries: Vec<StreamId> = reply
                .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
                .unwrap_or_default();

            if draining_pending && entries.is_empty() {
                draining_pending = false;
                continue;
            }

            for entry in entries {
                let payload: Option<String> = entry.get(PAYLOAD_FIELD);
                let acked = match payload {
                    Some(payload) => {
                        deliver(topic, &payload, handler, self.options.delivery, shutdown).await
                    }
                    None => {
                        tracing::warn!(topic = %topic, id = %entry.id, "Stream entry has no payload");
                        true
                    }
                };
                if !acked {
                    return Ok(());
                }

                let _: u64 = redis::cmd("XACK")
                    .arg(topic)
                    .arg(group)
                    .arg(&entry.id)
                    .query_async(conn)
                    .await?;
            }
        }
    }

    /// Sleep for the retry interval. Returns `false` if shutdown fired first.
    async fn pause(&self, shutdown: &mut ShutdownSignal) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.options.retry_interval) => true,
            _ = shutdown.recv() => false,
        }
    }
}

fn latest_payload(entries: Vec<StreamId>) -> Option<String> {
    entries
        .into_iter()
        .last()
        .and_then(|entry| entry.get(PAYLOAD_FIELD))
}

#[async_trait]
impl StatusBus for RedisStreamBus {
    async fn publish(&self, topic: &str, record: &StatusRecord) -> Result<(), BrokerError> {
        let payload = record.encode()?;
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("XADD")
            .arg(topic)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.options.max_len)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe_async(
        &self,
        topic: &str,
        handler: Arc<dyn StatusHandler>,
        mut shutdown: ShutdownSignal,
    ) {
        while !shutdown.is_triggered() {
            let mut conn = match self.dedicated_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Failed to connect status consumer, retrying");
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self.ensure_group(&mut conn, topic).await {
                tracing::warn!(topic = %topic, error = %e, "Failed to subscribe to topic, retrying");
                if !self.pause(&mut shutdown).await {
                    break;
                }
                continue;
            }

            tracing::info!(topic = %topic, "Subscribed to status topic");

            match self
                .consume(&mut conn, topic, handler.as_ref(), &mut shutdown)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "Status consumer failed, resubscribing");
                    if !self.pause(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(topic = %topic, "Status consumer stopped");
    }

    async fn subscribe(&self, topic: &str, wait: Duration) -> Result<StatusRecord, BrokerError> {
        let subscribe_failed = |e: RedisError| BrokerError::SubscribeFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        };

        let mut conn = self.conn.clone();
        let latest: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(topic)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(subscribe_failed)?;

        if let Some(payload) = latest_payload(latest.ids) {
            return StatusRecord::decode(&payload);
        }

        let mut blocking = self.dedicated_connection().await.map_err(subscribe_failed)?;
        let reply: Option<StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(wait.as_millis().max(1) as u64)
            .arg("STREAMS")
            .arg(topic)
            .arg("$")
            .query_async(&mut blocking)
            .await
            .map_err(subscribe_failed)?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        match latest_payload(entries) {
            Some(payload) => StatusRecord::decode(&payload),
            None => Err(BrokerError::NoStatus(topic.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_payload_picks_last_entry() {
        let mut older = StreamId::default();
        older.id = "1-0".into();
        older
            .map
            .insert(PAYLOAD_FIELD.into(), redis::Value::BulkString(b"old".to_vec()));
        let mut newer = StreamId::default();
        newer.id = "2-0".into();
        newer
            .map
            .insert(PAYLOAD_FIELD.into(), redis::Value::BulkString(b"new".to_vec()));

        assert_eq!(latest_payload(vec![older, newer]), Some("new".to_string()));
        assert_eq!(latest_payload(Vec::new()), None);
    }

    use crate::breaker::State;
    use crate::error::CascadeError;
    use crate::lifecycle::Shutdown;
    use tokio::sync::mpsc;

    /// Reports each record it sees, then either accepts or refuses it.
    struct Report {
        tx: mpsc::UnboundedSender<StatusRecord>,
        accept: bool,
    }

    #[async_trait]
    impl StatusHandler for Report {
        async fn handle(&self, record: StatusRecord) -> Result<(), CascadeError> {
            let _ = self.tx.send(record);
            if self.accept {
                Ok(())
            } else {
                Err(CascadeError::Validation("store unavailable".into()))
            }
        }
    }

    fn spawn_consumer(
        bus: &RedisStreamBus,
        topic: &str,
        accept: bool,
        shutdown: &Shutdown,
    ) -> (tokio::task::JoinHandle<()>, mpsc::UnboundedReceiver<StatusRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = bus.clone();
        let topic = topic.to_string();
        let signal = shutdown.signal();
        let handle = tokio::spawn(async move {
            bus.subscribe_async(&topic, Arc::new(Report { tx, accept }), signal)
                .await;
        });
        (handle, rx)
    }

    /// Needs a live server, set `CASCADE_TEST_REDIS_URL` to run.
    #[tokio::test]
    async fn test_restart_with_same_group_redelivers_pending() {
        let Ok(url) = std::env::var("CASCADE_TEST_REDIS_URL") else {
            return;
        };
        let topic = format!("cascade-test-{}", uuid::Uuid::new_v4().simple());
        let options = StreamOptions {
            group: "cascade-breaker-test-host".into(),
            max_len: 100,
            block: Duration::from_millis(50),
            retry_interval: Duration::from_millis(50),
            delivery: DeliveryPolicy {
                base_backoff_ms: 10,
                max_backoff_ms: 50,
            },
        };

        let first = RedisStreamBus::connect(&url, options.clone()).await.unwrap();
        let mut conn = first.dedicated_connection().await.unwrap();
        first.ensure_group(&mut conn, &topic).await.unwrap();
        let record = StatusRecord::new("GET:b/y", State::Open, Duration::from_secs(60));
        first.publish(&topic, &record).await.unwrap();

        // The first run reads the record but stops before handling it.
        let shutdown = Shutdown::new();
        let (consumer, mut seen) = spawn_consumer(&first, &topic, false, &shutdown);
        let got = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, record);
        shutdown.trigger();
        consumer.await.unwrap();

        let restarted = RedisStreamBus::connect(&url, options).await.unwrap();
        let shutdown = Shutdown::new();
        let (consumer, mut seen) = spawn_consumer(&restarted, &topic, true, &shutdown);
        let got = tokio::time::timeout(Duration::from_secs(5), seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, record);

        // Acknowledged now, so nothing is left pending for the group.
        let mut pending = 1;
        for _ in 0..50 {
            let summary: redis::Value = redis::cmd("XPENDING")
                .arg(&topic)
                .arg("cascade-breaker-test-host")
                .query_async(&mut conn)
                .await
                .unwrap();
            pending = match summary {
                redis::Value::Array(fields) => match fields.first() {
                    Some(redis::Value::Int(n)) => *n,
                    _ => -1,
                },
                _ => -1,
            };
            if pending == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(pending, 0);

        shutdown.trigger();
        consumer.await.unwrap();
        let _: i64 = redis::cmd("DEL").arg(&topic).query_async(&mut conn).await.unwrap();
    }
}
