//! In-process status bus.
//!
//! Each topic is a bounded log plus a watch channel carrying its end offset.
//! Consumers keep their own absolute cursor, so a slow consumer never blocks
//! publishers and a replayed cursor redelivers. Once a topic holds more than
//! `max_len` records the oldest are dropped, and a consumer that fell behind
//! them resumes at the oldest retained record.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;

use super::{deliver, BrokerError, DeliveryPolicy, StatusBus, StatusHandler, StatusRecord};
use crate::lifecycle::ShutdownSignal;

/// Records retained per topic unless configured otherwise.
pub const DEFAULT_MAX_LEN: usize = 1000;

#[derive(Debug, Default)]
struct Log {
    /// Offset of the oldest retained entry.
    base: usize,
    entries: VecDeque<String>,
}

impl Log {
    fn end(&self) -> usize {
        self.base + self.entries.len()
    }
}

#[derive(Debug)]
struct Topic {
    log: Mutex<Log>,
    head: watch::Sender<usize>,
    consumers: AtomicUsize,
}

impl Topic {
    fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            log: Mutex::new(Log::default()),
            head,
            consumers: AtomicUsize::new(0),
        }
    }

    /// Append `payload`, trimming to `max_len`. Returns the new end offset.
    fn append(&self, payload: String, max_len: usize) -> usize {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.push_back(payload);
        while log.entries.len() > max_len.max(1) {
            log.entries.pop_front();
            log.base += 1;
        }
        log.end()
    }

    /// Retained entries in `[from, to)`, with the offset of the first one.
    ///
    /// `from` is raised to the oldest retained offset.
    fn read(&self, from: usize, to: usize) -> (usize, Vec<String>) {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        let start = from.max(log.base);
        let end = to.min(log.end());
        if start >= end {
            return (start, Vec::new());
        }
        let entries = log
            .entries
            .range(start - log.base..end - log.base)
            .cloned()
            .collect();
        (start, entries)
    }

    fn last(&self) -> Option<String> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.back().cloned()
    }

    fn retained(&self) -> usize {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.entries.len()
    }
}

/// [`StatusBus`] for a single process. Clones share the same topics.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    topics: Arc<DashMap<String, Arc<Topic>>>,
    fail_publish: Arc<AtomicBool>,
    policy: DeliveryPolicy,
    max_len: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self {
            topics: Arc::default(),
            fail_publish: Arc::default(),
            policy: DeliveryPolicy::default(),
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DeliveryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Retain at most `max_len` records per topic.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Make every subsequent publish fail (failure injection).
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Records still retained on `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<StatusRecord> {
        self.topics
            .get(topic)
            .map(|t| {
                let head = *t.head.borrow();
                t.read(0, head)
                    .1
                    .iter()
                    .filter_map(|raw| StatusRecord::decode(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of records held for `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.retained()).unwrap_or(0)
    }

    /// Number of consumer loops currently attached to `topic`.
    pub fn consumers(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.consumers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new()))
            .clone()
    }
}

struct ConsumerGuard(Arc<Topic>);

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.0.consumers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusBus for InMemoryBus {
    async fn publish(&self, topic: &str, record: &StatusRecord) -> Result<(), BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::PublishFailed {
                topic: topic.to_string(),
                reason: "bus unavailable".to_string(),
            });
        }
        let payload = record.encode()?;
        let t = self.topic(topic);
        let end = t.append(payload, self.max_len);
        t.head.send_replace(end);
        Ok(())
    }

    async fn subscribe_async(
        &self,
        topic: &str,
        handler: Arc<dyn StatusHandler>,
        mut shutdown: ShutdownSignal,
    ) {
        let t = self.topic(topic);
        t.consumers.fetch_add(1, Ordering::SeqCst);
        let _guard = ConsumerGuard(t.clone());

        let mut head = t.head.subscribe();
        let mut cursor = *head.borrow_and_update();
        tracing::info!(topic = %topic, "Subscribed to status topic");

        loop {
            let end = *head.borrow_and_update();
            let (start, payloads) = t.read(cursor, end);
            if start > cursor {
                tracing::warn!(
                    topic = %topic,
                    skipped = start - cursor,
                    "Status consumer fell behind, oldest records were trimmed"
                );
                cursor = start;
            }
            for payload in payloads {
                if !deliver(topic, &payload, handler.as_ref(), self.policy, &mut shutdown).await {
                    return;
                }
                cursor += 1;
            }

            tokio::select! {
                changed = head.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(topic = %topic, "Status consumer stopping");
                    return;
                }
            }
        }
    }

    async fn subscribe(&self, topic: &str, wait: Duration) -> Result<StatusRecord, BrokerError> {
        let t = self.topic(topic);
        let mut head = t.head.subscribe();

        if let Some(raw) = t.last() {
            return StatusRecord::decode(&raw);
        }

        let appeared = tokio::time::timeout(wait, head.wait_for(|len| *len > 0))
            .await
            .map(|waited| waited.is_ok())
            .unwrap_or(false);

        match t.last() {
            Some(raw) if appeared => StatusRecord::decode(&raw),
            _ => Err(BrokerError::NoStatus(topic.to_string())),
        }
    }
}
