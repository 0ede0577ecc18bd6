//! Record assembly for one entity stream.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use streamgen_core::{EntityConfig, GenError, Record, Value};

use crate::fields::{self, Context};
use crate::pool::ReferencePool;

/// Builds complete records for a single entity.
///
/// Each build runs three phases in order: relationship foreign keys are
/// sampled from the pool, schema fields are evaluated, then derived fields
/// are evaluated in declaration order (so `reference` descriptors can read
/// the foreign keys bound in phase one). The sequence counter advances once
/// per attempted build and is never rewound, so a failed build burns its
/// sequence number.
pub struct EntityGenerator {
    entity: String,
    config: EntityConfig,
    id_field: String,
    pool: Arc<ReferencePool>,
    rng: StdRng,
    seq: u64,
}

impl EntityGenerator {
    /// Create a generator for `entity`. The RNG is seeded from the run seed
    /// and the entity name, so streams are deterministic per entity and
    /// independent of scheduling.
    pub fn new(entity: &str, config: EntityConfig, pool: Arc<ReferencePool>, seed: u64) -> Self {
        let id_field = config.resolved_id_field(entity);
        Self {
            entity: entity.to_string(),
            config,
            id_field,
            pool,
            rng: StdRng::seed_from_u64(entity_seed(seed, entity)),
            seq: 0,
        }
    }

    /// The entity name this generator builds.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The resolved ID field name.
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// The current sequence counter (number of attempted builds).
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Entities referenced by this generator's relationships.
    pub fn parent_entities(&self) -> Vec<String> {
        self.config
            .relationships
            .iter()
            .map(|(_, rel)| rel.target_entity().to_string())
            .collect()
    }

    /// Extract the record's ID value rendered as a string.
    pub fn id_of(&self, record: &Record) -> Option<String> {
        record.get(&self.id_field).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Build one record.
    pub fn build(&mut self) -> Result<Record, GenError> {
        self.seq += 1;
        let seq = self.seq;
        let mut record = Record::new();

        // Entities that never declare their ID field get a fresh UUID, bound
        // first so it leads the emitted record.
        if !self.config.declares_id_field(&self.entity) {
            record.insert(
                self.id_field.clone(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }

        for (field, rel) in &self.config.relationships {
            let id = self.pool.sample_id(
                rel.target_entity(),
                rel.distribution,
                rel.alpha,
                rel.recency_bias,
                &mut self.rng,
            )?;
            record.insert(field.clone(), Value::String(id));
        }

        for (field, spec) in &self.config.schema {
            if record.contains(field) {
                continue;
            }
            let ctx = Context {
                entity: &self.entity,
                seq,
                record: &record,
                pool: &self.pool,
            };
            let value = fields::evaluate(spec, field, &ctx, &mut self.rng)?;
            record.insert(field.clone(), value);
        }

        for (field, spec) in &self.config.derived_fields {
            let ctx = Context {
                entity: &self.entity,
                seq,
                record: &record,
                pool: &self.pool,
            };
            let value = fields::evaluate(spec, field, &ctx, &mut self.rng)?;
            record.insert(field.clone(), value);
        }

        Ok(record)
    }
}

fn entity_seed(seed: u64, entity: &str) -> u64 {
    entity
        .bytes()
        .fold(seed, |acc, b| (acc ^ b as u64).wrapping_mul(0x9E3779B97F4A7C15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamgen_core::CorrelationConfig;

    fn orders_pool() -> Arc<ReferencePool> {
        let pool = Arc::new(ReferencePool::new());
        for i in 1..=5 {
            let id = format!("CUST_{i:04}");
            let mut record = Record::new();
            record.insert("customer_id", Value::String(id.clone()));
            record.insert("tier", Value::String("gold".into()));
            pool.append("customers", id, record);
        }
        pool
    }

    fn config() -> CorrelationConfig {
        CorrelationConfig::from_yaml(
            r#"
master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    count: 5
    schema:
      customer_id: {type: string, format: "CUST_{seq:04d}"}
      name: {type: faker, method: name}
      tier: {type: choice, choices: [gold, silver]}
transactional_data:
  orders:
    kafka_topic: orders
    id_field: order_id
    relationships:
      customer_id:
        references: "customers.customer_id"
    derived_fields:
      order_id: {type: string, format: "ORDER_{seq:05d}"}
      total_amount: {type: float, min: 10.0, max: 500.0}
      tier: {type: reference, source: "customers.tier", via: customer_id}
"#,
        )
        .unwrap()
    }

    fn orders_generator(pool: Arc<ReferencePool>) -> EntityGenerator {
        let config = config();
        let (_, orders) = config
            .transactional_data
            .iter()
            .find(|(n, _)| n == "orders")
            .unwrap()
            .clone();
        EntityGenerator::new("orders", orders, pool, 42)
    }

    #[test]
    fn test_build_binds_relationship_then_derived() {
        let pool = orders_pool();
        let mut generator = orders_generator(pool.clone());

        let record = generator.build().unwrap();
        let customer_id = record.get("customer_id").unwrap().as_str().unwrap();
        assert!(pool.contains("customers", customer_id));
        assert_eq!(record.get("order_id").unwrap().as_str(), Some("ORDER_00001"));
        assert_eq!(record.get("tier").unwrap().as_str(), Some("gold"));
    }

    #[test]
    fn test_sequence_ids_are_gapless() {
        let pool = orders_pool();
        let mut generator = orders_generator(pool);

        let ids: Vec<String> = (0..4)
            .map(|_| generator.build().unwrap())
            .map(|r| r.get("order_id").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            ids,
            vec!["ORDER_00001", "ORDER_00002", "ORDER_00003", "ORDER_00004"]
        );
    }

    #[test]
    fn test_failed_build_burns_sequence_number() {
        // No customers appended, so the relationship sample fails.
        let pool = Arc::new(ReferencePool::new());
        let mut generator = orders_generator(pool.clone());

        let err = generator.build().unwrap_err();
        assert!(matches!(err, GenError::EmptyPool(_)));
        assert_eq!(generator.sequence(), 1);

        // Retry after the parent appears: the ID skips the burned number.
        let mut parent = Record::new();
        parent.insert("customer_id", Value::String("CUST_0001".into()));
        parent.insert("tier", Value::String("gold".into()));
        pool.append("customers", "CUST_0001".to_string(), parent);

        let record = generator.build().unwrap();
        assert_eq!(record.get("order_id").unwrap().as_str(), Some("ORDER_00002"));
    }

    #[test]
    fn test_undeclared_id_field_gets_uuid() {
        let config = CorrelationConfig::from_yaml(
            r#"
transactional_data:
  events:
    kafka_topic: events
    derived_fields:
      kind: {type: string, initial_value: click}
"#,
        )
        .unwrap();
        let (_, events) = config.transactional_data[0].clone();
        let pool = Arc::new(ReferencePool::new());
        let mut generator = EntityGenerator::new("events", events, pool, 42);

        let record = generator.build().unwrap();
        let id = record.get("event_id").unwrap().as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        // Auto-generated ID leads the record.
        assert_eq!(record.iter().next().unwrap().0, "event_id");
    }

    #[test]
    fn test_same_seed_same_stream() {
        let pool_a = orders_pool();
        let pool_b = orders_pool();
        let mut gen_a = orders_generator(pool_a);
        let mut gen_b = orders_generator(pool_b);

        for _ in 0..5 {
            let a = gen_a.build().unwrap();
            let b = gen_b.build().unwrap();
            assert_eq!(a.get("customer_id"), b.get("customer_id"));
            assert_eq!(a.get("total_amount"), b.get("total_amount"));
        }
    }
}
