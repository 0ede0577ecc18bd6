//! Correlation orchestrator.
//!
//! Drives a run through its phases: masters are generated and published
//! serially, then every transactional entity streams from its own task
//! under its own rate limit, then the publisher drains. The reference pool
//! is the only shared mutable structure; per-entity sequence counters live
//! inside each task's generator.

use crate::master;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streamgen_core::{CorrelationConfig, EntityConfig, GenError};
use streamgen_generate::{EntityGenerator, RateLimiter, ReferencePool};
use streamgen_kafka::{Encoder, EntityCodec, Error as SinkError, Sink};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Queue-full backoff: doubling from 10ms, capped at 100ms, bounded tries.
const PUBLISH_ATTEMPTS: u32 = 8;
const BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const BACKOFF_CAP: Duration = Duration::from_millis(100);

/// Default master count when the config leaves it unset.
const DEFAULT_MASTER_COUNT: u64 = 100;

/// Per-entity outcome reported at the end of a run.
#[derive(Debug, Clone)]
pub struct EntitySummary {
    pub entity: String,
    pub topic: String,
    pub sent: u64,
    pub acked: u64,
    pub failed: u64,
}

/// Final run report.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub entities: Vec<EntitySummary>,
    /// Messages still unacknowledged when the drain deadline expired.
    pub residual: u64,
    /// Whether the run hit a fatal error (a failed task or master phase).
    pub fatal: bool,
}

impl Summary {
    /// Process exit code: 0 on full success, 3 on drain timeout, 1 on any
    /// fatal error or delivery failure.
    pub fn exit_code(&self) -> i32 {
        if self.fatal {
            crate::exit::RUNTIME
        } else if self.residual > 0 {
            crate::exit::DRAIN_TIMEOUT
        } else if self.entities.iter().any(|e| e.failed > 0) {
            crate::exit::RUNTIME
        } else {
            crate::exit::SUCCESS
        }
    }

    fn log(&self) {
        for entity in &self.entities {
            info!(
                entity = %entity.entity,
                topic = %entity.topic,
                sent = entity.sent,
                acked = entity.acked,
                failed = entity.failed,
                "entity summary"
            );
        }
        if self.residual > 0 {
            error!(residual = self.residual, "drain deadline hit with messages in flight");
        }
    }
}

enum PublishOutcome {
    Submitted,
    Dropped,
    Cancelled,
}

/// Top-level driver for one generation run.
pub struct Orchestrator {
    config: Arc<CorrelationConfig>,
    pool: Arc<ReferencePool>,
    sink: Arc<dyn Sink>,
    encoder: Arc<Encoder>,
    codecs: Arc<HashMap<String, EntityCodec>>,
    seed: u64,
    drain_timeout: Duration,
}

impl Orchestrator {
    /// Assemble a run. The pool is registered for every declared entity so
    /// recency tracking is active from the first append.
    pub fn new(
        config: Arc<CorrelationConfig>,
        sink: Arc<dyn Sink>,
        encoder: Encoder,
        seed: u64,
        drain_timeout: Duration,
    ) -> Self {
        let pool = Arc::new(ReferencePool::new());
        let mut codecs = HashMap::new();
        for (entity, cfg) in config
            .master_data
            .iter()
            .chain(config.transactional_data.iter())
        {
            pool.register(entity, cfg.track_recent);
            codecs.insert(entity.clone(), EntityCodec::new(entity, cfg, config.as_ref()));
        }

        Self {
            config,
            pool,
            sink,
            encoder: Arc::new(encoder),
            codecs: Arc::new(codecs),
            seed,
            drain_timeout,
        }
    }

    /// The shared reference pool (exposed for assertions in tests).
    pub fn pool(&self) -> Arc<ReferencePool> {
        Arc::clone(&self.pool)
    }

    /// Run bulk load, streaming, and drain. `shutdown` cancels the run from
    /// the next suspension point of every task.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Summary {
        let mut summary = Summary::default();
        let mut dropped: HashMap<String, u64> = HashMap::new();

        // Every receiver subscribes before any work starts; a signal fired
        // during bulk load must still reach the stream tasks.
        let task_receivers: Vec<broadcast::Receiver<()>> = self
            .config
            .transactional_data
            .iter()
            .map(|_| shutdown.subscribe())
            .collect();

        let mut cancelled = false;
        match self.bulk_load_masters(&shutdown).await {
            Ok(bulk) => {
                dropped.extend(bulk.dropped);
                cancelled = bulk.cancelled;
            }
            Err(e) => {
                error!("master bulk load failed: {e}");
                summary.fatal = true;
            }
        }

        if !summary.fatal && !cancelled {
            let mut handles = Vec::new();
            for ((entity, cfg), rx) in self
                .config
                .transactional_data
                .iter()
                .zip(task_receivers.into_iter())
            {
                handles.push(self.spawn_stream_task(entity.clone(), cfg.clone(), rx));
            }

            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        if let Some(reason) = outcome.fatal {
                            error!(entity = %outcome.entity, "stream task failed: {reason}");
                            summary.fatal = true;
                        }
                        dropped.insert(outcome.entity, outcome.dropped);
                    }
                    Err(e) => {
                        error!("stream task panicked: {e}");
                        summary.fatal = true;
                    }
                }
            }
        }

        summary.residual = self.sink.close(self.drain_timeout).await;

        for (entity, cfg) in self
            .config
            .master_data
            .iter()
            .chain(self.config.transactional_data.iter())
        {
            let counters = self.sink.counters(&cfg.kafka_topic);
            summary.entities.push(EntitySummary {
                entity: entity.clone(),
                topic: cfg.kafka_topic.clone(),
                sent: counters.sent,
                acked: counters.acked,
                failed: counters.failed + dropped.get(entity).copied().unwrap_or(0),
            });
        }

        for stat in self.pool.stats() {
            info!(
                entity = %stat.entity,
                records = stat.records,
                accesses = stat.accesses,
                "reference pool"
            );
        }
        summary.log();
        summary
    }

    /// Generate and publish every master entity serially, at full rate,
    /// appending to the pool on successful submit. Finishes with a flush so
    /// downstream streams start against a broker that has the masters.
    async fn bulk_load_masters(
        &self,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<BulkLoadOutcome, GenError> {
        let mut rx = shutdown.subscribe();
        let mut outcome = BulkLoadOutcome::default();

        for (entity, cfg) in &self.config.master_data {
            let records = self.build_master_records(entity, cfg)?;
            let id_field = cfg.resolved_id_field(entity);
            let codec = &self.codecs[entity];
            let mut entity_dropped = 0u64;

            info!(entity = %entity, count = records.len(), "bulk loading master data");
            for record in records {
                let id = record
                    .get(&id_field)
                    .map(|v| v.to_string())
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        GenError::config(format!(
                            "master '{entity}' record is missing its ID field '{id_field}'"
                        ))
                    })?;

                if cfg.bulk_load {
                    let payload = self
                        .encoder
                        .encode(codec, &record)
                        .await
                        .map_err(|e| GenError::generation(entity, &id_field, e.to_string()))?;
                    let key = cfg
                        .key_field
                        .as_deref()
                        .and_then(|f| record.get(f))
                        .map(|v| v.to_string());
                    match publish_with_backoff(
                        self.sink.as_ref(),
                        &cfg.kafka_topic,
                        key.as_deref(),
                        &payload,
                        &mut rx,
                    )
                    .await
                    {
                        PublishOutcome::Submitted => self.pool.append(entity, id, record),
                        PublishOutcome::Dropped => entity_dropped += 1,
                        PublishOutcome::Cancelled => {
                            outcome.dropped.insert(entity.clone(), entity_dropped);
                            outcome.cancelled = true;
                            return Ok(outcome);
                        }
                    }
                } else {
                    self.pool.append(entity, id, record);
                }
            }
            outcome.dropped.insert(entity.clone(), entity_dropped);
        }

        // Downstream references must observe the masters before streaming.
        let residual = self.sink.flush(self.drain_timeout).await;
        if residual > 0 {
            warn!(residual, "masters still in flight after bulk-load flush");
        }
        Ok(outcome)
    }

    fn build_master_records(
        &self,
        entity: &str,
        cfg: &EntityConfig,
    ) -> Result<Vec<streamgen_core::Record>, GenError> {
        if cfg.source == streamgen_core::SourceKind::Csv {
            let file = cfg
                .file
                .as_ref()
                .ok_or_else(|| GenError::config(format!("master '{entity}' has no CSV file")))?;
            return master::load_csv_records(file);
        }

        let count = cfg.count.unwrap_or(DEFAULT_MASTER_COUNT);
        let mut generator =
            EntityGenerator::new(entity, cfg.clone(), Arc::clone(&self.pool), self.seed);
        (0..count).map(|_| generator.build()).collect()
    }

    fn spawn_stream_task(
        &self,
        entity: String,
        cfg: EntityConfig,
        mut rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<TaskOutcome> {
        let config = Arc::clone(&self.config);
        let pool = Arc::clone(&self.pool);
        let sink = Arc::clone(&self.sink);
        let encoder = Arc::clone(&self.encoder);
        let codecs = Arc::clone(&self.codecs);
        let seed = self.seed;

        tokio::spawn(async move {
            let codec = &codecs[&entity];
            let topic = cfg.kafka_topic.clone();
            let key_field = cfg.key_field.clone();
            let max_messages = cfg.max_messages;
            let mut limiter = RateLimiter::new(cfg.rate_per_second);
            let mut generator = EntityGenerator::new(&entity, cfg, Arc::clone(&pool), seed);

            let mut outcome = TaskOutcome {
                entity: entity.clone(),
                dropped: 0,
                fatal: None,
            };
            let mut produced = 0u64;

            // Records must only ever reference already-appended parents. A
            // master parent that is still empty here can never fill; a
            // transactional parent fills as its own task emits, so wait for
            // its first append before forming any record (record formation
            // advances the sequence counter even on failure).
            for target in generator.parent_entities() {
                if pool.count(&target) > 0 {
                    continue;
                }
                if config.master_data.iter().any(|(name, _)| *name == target) {
                    outcome.fatal =
                        Some(format!("master '{target}' has no records to reference"));
                    return outcome;
                }
                while pool.count(&target) == 0 {
                    if shutdown_requested(&mut rx) {
                        return outcome;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }

            info!(entity = %entity, topic = %topic, "streaming transactional data");
            loop {
                if shutdown_requested(&mut rx) {
                    break;
                }
                if let Some(max) = max_messages {
                    if produced >= max {
                        break;
                    }
                }

                let wait = limiter.reserve();
                if !wait.is_zero() {
                    tokio::select! {
                        _ = rx.recv() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }

                let record = match generator.build() {
                    Ok(record) => record,
                    Err(e) if e.is_task_fatal() => {
                        outcome.fatal = Some(e.to_string());
                        break;
                    }
                    Err(e) => {
                        warn!(entity = %entity, "dropping record: {e}");
                        outcome.dropped += 1;
                        continue;
                    }
                };

                let payload = match encoder.encode(codec, &record).await {
                    Ok(payload) => payload,
                    Err(e) if e.is_task_fatal() => {
                        outcome.fatal = Some(e.to_string());
                        break;
                    }
                    Err(e) => {
                        warn!(entity = %entity, "dropping unencodable record: {e}");
                        outcome.dropped += 1;
                        continue;
                    }
                };

                let key = key_field
                    .as_deref()
                    .and_then(|f| record.get(f))
                    .map(|v| v.to_string());
                match publish_with_backoff(sink.as_ref(), &topic, key.as_deref(), &payload, &mut rx)
                    .await
                {
                    PublishOutcome::Submitted => {
                        let id = generator.id_of(&record).unwrap_or_default();
                        pool.append(&entity, id, record);
                        produced += 1;
                    }
                    PublishOutcome::Dropped => outcome.dropped += 1,
                    PublishOutcome::Cancelled => break,
                }
            }

            info!(entity = %entity, produced, dropped = outcome.dropped, "stream task done");
            outcome
        })
    }
}

struct TaskOutcome {
    entity: String,
    dropped: u64,
    fatal: Option<String>,
}

#[derive(Default)]
struct BulkLoadOutcome {
    dropped: HashMap<String, u64>,
    cancelled: bool,
}

fn shutdown_requested(rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty))
}

/// Publish with bounded exponential backoff on producer back-pressure.
/// Non-transient errors are not retried here; the broker client owns
/// transient delivery retries.
async fn publish_with_backoff(
    sink: &dyn Sink,
    topic: &str,
    key: Option<&str>,
    payload: &[u8],
    shutdown: &mut broadcast::Receiver<()>,
) -> PublishOutcome {
    let mut backoff = BACKOFF_INITIAL;
    for _ in 0..PUBLISH_ATTEMPTS {
        match sink.publish(topic, key, payload).await {
            Ok(()) => return PublishOutcome::Submitted,
            Err(SinkError::QueueFull) => {
                tokio::select! {
                    _ = shutdown.recv() => return PublishOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
            Err(e) => {
                warn!(topic = %topic, "publish failed: {e}");
                return PublishOutcome::Dropped;
            }
        }
    }
    warn!(topic = %topic, "dropping record after repeated queue-full");
    PublishOutcome::Dropped
}
