//! Publishing sinks with delivery accounting.
//!
//! The orchestrator publishes through the [`Sink`] trait: the real
//! [`KafkaSink`], the [`StdoutSink`] that replaces it on dry runs, and the
//! [`MemorySink`] used by integration tests. Every sink keeps per-topic
//! `sent` / `acked` / `failed` counters; `publish` accounts a successful
//! hand-off as `sent`, and the asynchronous delivery outcome later lands in
//! `acked` or `failed`.

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Point-in-time delivery counters for one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySnapshot {
    pub sent: u64,
    pub acked: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct TopicCounters {
    sent: AtomicU64,
    acked: AtomicU64,
    failed: AtomicU64,
}

/// Shared accounting used by every sink implementation.
#[derive(Debug, Clone, Default)]
struct DeliveryLedger {
    inner: Arc<LedgerInner>,
}

#[derive(Debug, Default)]
struct LedgerInner {
    topics: Mutex<HashMap<String, Arc<TopicCounters>>>,
    in_flight: AtomicU64,
}

impl DeliveryLedger {
    fn topic(&self, name: &str) -> Arc<TopicCounters> {
        let mut topics = self.inner.topics.lock().expect("ledger lock poisoned");
        Arc::clone(topics.entry(name.to_string()).or_default())
    }

    fn snapshot(&self, name: &str) -> DeliverySnapshot {
        let counters = self.topic(name);
        DeliverySnapshot {
            sent: counters.sent.load(Ordering::Relaxed),
            acked: counters.acked.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    fn in_flight(&self) -> u64 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait for in-flight deliveries to settle; returns the residual count.
    async fn drain(&self, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        loop {
            let residual = self.in_flight();
            if residual == 0 || Instant::now() >= deadline {
                return residual;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Asynchronous publisher with per-topic delivery accounting.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Hand one message to the broker client. Returns once the message is
    /// queued; delivery is acknowledged asynchronously.
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()>;

    /// Block until all in-flight messages are acknowledged or the timeout
    /// expires. Returns the residual in-flight count.
    async fn flush(&self, timeout: Duration) -> u64;

    /// Finish the sink's work for this run; implies a flush.
    async fn close(&self, timeout: Duration) -> u64 {
        self.flush(timeout).await
    }

    /// Delivery counters for one topic.
    fn counters(&self, topic: &str) -> DeliverySnapshot;
}

/// Kafka producer sink.
///
/// Sends are pipelined through rdkafka's `FutureProducer`; a watcher task
/// per message settles the `acked` / `failed` counters when the delivery
/// report arrives. Ordering per topic and key is the producer's: submission
/// order is preserved per partition.
pub struct KafkaSink {
    producer: FutureProducer,
    ledger: DeliveryLedger,
}

impl KafkaSink {
    /// Create a sink from the broker configuration.
    pub fn new(broker: &BrokerConfig) -> Result<Self> {
        if broker.bootstrap_servers().is_none() {
            return Err(Error::InvalidConfig(
                "broker config is missing 'bootstrap.servers'".to_string(),
            ));
        }
        let producer: FutureProducer = broker.client_config().create()?;
        Ok(Self {
            producer,
            ledger: DeliveryLedger::default(),
        })
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => {
                return Err(Error::QueueFull);
            }
            Err((err, _)) => return Err(Error::Kafka(err)),
        };

        let counters = self.ledger.topic(topic);
        counters.sent.fetch_add(1, Ordering::Relaxed);
        self.ledger.inner.in_flight.fetch_add(1, Ordering::AcqRel);

        let ledger = self.ledger.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {
                    counters.acked.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err((err, _))) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %topic, error = %err, "delivery failed");
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(topic = %topic, "delivery future dropped by producer");
                }
            }
            ledger.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        });

        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> u64 {
        self.ledger.drain(timeout).await
    }

    fn counters(&self, topic: &str) -> DeliverySnapshot {
        self.ledger.snapshot(topic)
    }
}

/// Dry-run sink: writes messages to stdout and never opens a connection.
#[derive(Debug, Default)]
pub struct StdoutSink {
    ledger: DeliveryLedger,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let rendered = match std::str::from_utf8(payload) {
            Ok(text) => text.to_string(),
            Err(_) => payload
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
        };
        println!("{topic} {} {rendered}", key.unwrap_or("-"));

        let counters = self.ledger.topic(topic);
        counters.sent.fetch_add(1, Ordering::Relaxed);
        counters.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> u64 {
        0
    }

    fn counters(&self, topic: &str) -> DeliverySnapshot {
        self.ledger.snapshot(topic)
    }
}

/// A message captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// In-memory sink for tests. Optionally rejects the first N publishes with
/// `QueueFull` to exercise back-pressure handling.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<SinkMessage>>,
    ledger: DeliveryLedger,
    queue_full_budget: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `n` publishes with `QueueFull`.
    pub fn with_queue_full(self, n: u64) -> Self {
        self.queue_full_budget.store(n, Ordering::Relaxed);
        self
    }

    /// All captured messages, in submission order.
    pub fn messages(&self) -> Vec<SinkMessage> {
        self.messages.lock().expect("sink lock poisoned").clone()
    }

    /// Captured messages for one topic.
    pub fn messages_for(&self, topic: &str) -> Vec<SinkMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn publish(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<()> {
        let budget = self.queue_full_budget.load(Ordering::Relaxed);
        if budget > 0
            && self
                .queue_full_budget
                .compare_exchange(budget, budget - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Err(Error::QueueFull);
        }

        self.messages
            .lock()
            .expect("sink lock poisoned")
            .push(SinkMessage {
                topic: topic.to_string(),
                key: key.map(str::to_string),
                payload: payload.to_vec(),
            });
        let counters = self.ledger.topic(topic);
        counters.sent.fetch_add(1, Ordering::Relaxed);
        counters.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> u64 {
        0
    }

    fn counters(&self, topic: &str) -> DeliverySnapshot {
        self.ledger.snapshot(topic)
    }
}
