//! Reference pool for correlated ID sampling.
//!
//! The pool is the single shared structure between streams: every emitted
//! record is appended under its entity, indexed by ID, and later sampled by
//! downstream streams to resolve foreign keys. Entities get their own lock
//! so a lookup during one stream's record build never blocks another
//! stream's append.

use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use streamgen_core::config::Distribution;
use streamgen_core::{GenError, Record};

/// How many recently appended IDs are kept for recency-biased sampling.
pub const DEFAULT_RECENT_WINDOW: usize = 1000;

#[derive(Debug, Default)]
struct EntityPool {
    /// IDs in insertion order. Zipf ranks map onto this ordering.
    ids: Vec<String>,
    /// Full records by ID.
    records: HashMap<String, Record>,
    /// Ring of the most recently appended IDs.
    recent: VecDeque<String>,
    track_recent: bool,
    accesses: u64,
}

/// Per-entity counters reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub entity: String,
    pub records: usize,
    pub accesses: u64,
}

/// Thread-safe append-only store of emitted records.
#[derive(Debug, Default)]
pub struct ReferencePool {
    entities: RwLock<HashMap<String, Arc<RwLock<EntityPool>>>>,
    window: usize,
}

impl ReferencePool {
    /// Create a pool with the default recent-ID window.
    pub fn new() -> Self {
        Self::with_window(DEFAULT_RECENT_WINDOW)
    }

    /// Create a pool with a custom recent-ID window size.
    pub fn with_window(window: usize) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Pre-register an entity so its recency tracking flag is set before the
    /// first append.
    pub fn register(&self, entity: &str, track_recent: bool) {
        let slot = self.entity_pool(entity);
        slot.write().expect("pool lock poisoned").track_recent = track_recent;
    }

    fn entity_pool(&self, entity: &str) -> Arc<RwLock<EntityPool>> {
        if let Some(pool) = self
            .entities
            .read()
            .expect("pool lock poisoned")
            .get(entity)
        {
            return Arc::clone(pool);
        }
        let mut entities = self.entities.write().expect("pool lock poisoned");
        Arc::clone(
            entities
                .entry(entity.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(EntityPool::default()))),
        )
    }

    /// Append an emitted record. O(1); also updates the ID index and, for
    /// tracked entities, the recent-IDs ring.
    pub fn append(&self, entity: &str, id: String, record: Record) {
        let slot = self.entity_pool(entity);
        let mut pool = slot.write().expect("pool lock poisoned");
        if pool.records.contains_key(&id) {
            pool.records.insert(id, record);
            return;
        }
        pool.ids.push(id.clone());
        pool.records.insert(id.clone(), record);
        if pool.track_recent {
            if pool.recent.len() == self.window {
                pool.recent.pop_front();
            }
            pool.recent.push_back(id);
        }
    }

    /// Number of records appended for an entity.
    pub fn count(&self, entity: &str) -> usize {
        self.entities
            .read()
            .expect("pool lock poisoned")
            .get(entity)
            .map(|slot| slot.read().expect("pool lock poisoned").ids.len())
            .unwrap_or(0)
    }

    /// Whether an ID has been appended for an entity.
    pub fn contains(&self, entity: &str, id: &str) -> bool {
        self.entities
            .read()
            .expect("pool lock poisoned")
            .get(entity)
            .is_some_and(|slot| {
                slot.read()
                    .expect("pool lock poisoned")
                    .records
                    .contains_key(id)
            })
    }

    /// Sample an ID under the given distribution.
    ///
    /// `recent_only` restricts sampling to the entity's recent-IDs ring,
    /// uniformly; when the ring is empty the sample falls back to a uniform
    /// pick over the whole pool.
    pub fn sample_id<R: Rng + ?Sized>(
        &self,
        entity: &str,
        distribution: Distribution,
        alpha: f64,
        recent_only: bool,
        rng: &mut R,
    ) -> Result<String, GenError> {
        let slot = self.entity_pool(entity);
        let mut pool = slot.write().expect("pool lock poisoned");
        if pool.ids.is_empty() {
            return Err(GenError::EmptyPool(entity.to_string()));
        }
        pool.accesses += 1;

        if recent_only && !pool.recent.is_empty() {
            let idx = rng.random_range(0..pool.recent.len());
            return Ok(pool.recent[idx].clone());
        }

        let idx = match distribution {
            Distribution::Uniform => rng.random_range(0..pool.ids.len()),
            Distribution::Zipf => zipf_rank(pool.ids.len(), alpha, rng) - 1,
        };
        Ok(pool.ids[idx].clone())
    }

    /// Fetch the full record for a previously appended ID.
    pub fn lookup(&self, entity: &str, id: &str) -> Result<Record, GenError> {
        self.entities
            .read()
            .expect("pool lock poisoned")
            .get(entity)
            .and_then(|slot| {
                slot.read()
                    .expect("pool lock poisoned")
                    .records
                    .get(id)
                    .cloned()
            })
            .ok_or_else(|| GenError::MissingReference {
                entity: entity.to_string(),
                id: id.to_string(),
            })
    }

    /// Per-entity record and access counts, sorted by entity name.
    pub fn stats(&self) -> Vec<PoolStats> {
        let entities = self.entities.read().expect("pool lock poisoned");
        let mut stats: Vec<PoolStats> = entities
            .iter()
            .map(|(entity, slot)| {
                let pool = slot.read().expect("pool lock poisoned");
                PoolStats {
                    entity: entity.clone(),
                    records: pool.ids.len(),
                    accesses: pool.accesses,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.entity.cmp(&b.entity));
        stats
    }
}

/// Draw a 1-based rank with probability proportional to `1/k^alpha`.
///
/// Exact prefix-weight walk rather than an inverse-CDF approximation; the
/// head of the distribution carries most of the mass and downstream
/// assertions depend on its exact share.
fn zipf_rank<R: Rng + ?Sized>(n: usize, alpha: f64, rng: &mut R) -> usize {
    debug_assert!(n > 0);
    let total: f64 = (1..=n).map(|k| (k as f64).powf(-alpha)).sum();
    let mut u = rng.random::<f64>() * total;
    for k in 1..=n {
        u -= (k as f64).powf(-alpha);
        if u <= 0.0 {
            return k;
        }
    }
    n
}
