//! Field-level value generation.
//!
//! Each declared field descriptor evaluates to a single [`Value`] given the
//! generation context: the entity's sequence counter, the partially built
//! record, and the reference pool for parent lookups.

pub mod faker;
pub mod template;

use rand::rngs::StdRng;
use rand::Rng;
use streamgen_core::config::{split_reference, FieldSpec, TimestampFormat};
use streamgen_core::{GenError, Record, Value};

use crate::pool::ReferencePool;

/// Context a field descriptor is evaluated against.
pub struct Context<'a> {
    /// Entity being built, for error tagging.
    pub entity: &'a str,
    /// The entity's current sequence counter (already advanced for this
    /// build attempt).
    pub seq: u64,
    /// Fields bound so far, in binding order.
    pub record: &'a Record,
    /// Pool of previously emitted records.
    pub pool: &'a ReferencePool,
}

/// Evaluate one field descriptor.
pub fn evaluate(
    spec: &FieldSpec,
    field: &str,
    ctx: &Context<'_>,
    rng: &mut StdRng,
) -> Result<Value, GenError> {
    match spec {
        FieldSpec::String {
            format: Some(format),
            ..
        } => template::render(format, ctx.seq, ctx.record)
            .map(Value::String)
            .map_err(|reason| GenError::generation(ctx.entity, field, reason)),

        FieldSpec::String {
            initial_value: Some(value),
            ..
        } => Ok(Value::String(value.clone())),

        FieldSpec::String { .. } => Err(GenError::generation(
            ctx.entity,
            field,
            "string descriptor has neither 'format' nor 'initial_value'",
        )),

        FieldSpec::Faker { method, text } => faker::generate(method, text.as_deref(), rng)
            .map_err(|reason| GenError::generation(ctx.entity, field, reason)),

        FieldSpec::Uuid => Ok(Value::String(uuid::Uuid::new_v4().to_string())),

        FieldSpec::Int { min, max } => Ok(Value::Int(rng.random_range(*min..=*max))),

        FieldSpec::Float { min, max } => {
            let raw = if min == max {
                *min
            } else {
                rng.random_range(*min..*max)
            };
            Ok(Value::Float((raw * 100.0).round() / 100.0))
        }

        FieldSpec::Timestamp { format } => Ok(match format {
            TimestampFormat::Iso8601 => Value::String(chrono::Utc::now().to_rfc3339()),
            TimestampFormat::Epoch => Value::Int(chrono::Utc::now().timestamp()),
        }),

        FieldSpec::Choice { choices, weights } => Ok(pick_choice(choices, weights.as_deref(), rng)),

        FieldSpec::Reference { source, via } => resolve_reference(source, via, field, ctx),
    }
}

/// Uniform or weighted pick from a fixed list.
fn pick_choice(choices: &[Value], weights: Option<&[f64]>, rng: &mut StdRng) -> Value {
    match weights {
        Some(weights) if weights.len() == choices.len() => {
            let total: f64 = weights.iter().sum();
            let mut u = rng.random::<f64>() * total;
            for (choice, weight) in choices.iter().zip(weights) {
                u -= weight;
                if u <= 0.0 {
                    return choice.clone();
                }
            }
            choices[choices.len() - 1].clone()
        }
        _ => choices[rng.random_range(0..choices.len())].clone(),
    }
}

/// Copy a field from the parent record keyed by the already-bound `via`
/// foreign key.
fn resolve_reference(
    source: &str,
    via: &str,
    field: &str,
    ctx: &Context<'_>,
) -> Result<Value, GenError> {
    let (parent, parent_field) = split_reference(source).ok_or_else(|| {
        GenError::generation(ctx.entity, field, format!("malformed source '{source}'"))
    })?;

    let fk = ctx.record.get(via).ok_or_else(|| {
        GenError::generation(ctx.entity, field, format!("'via' field '{via}' is unbound"))
    })?;
    let id = match fk {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let parent_record = ctx.pool.lookup(parent, &id)?;
    parent_record.get(parent_field).cloned().ok_or_else(|| {
        GenError::generation(
            ctx.entity,
            field,
            format!("parent {parent}[{id}] has no field '{parent_field}'"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ctx<'a>(entity: &'a str, record: &'a Record, pool: &'a ReferencePool) -> Context<'a> {
        Context {
            entity,
            seq: 7,
            record,
            pool,
        }
    }

    #[test]
    fn test_int_range_inclusive() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = ReferencePool::new();
        let record = Record::new();
        let spec = FieldSpec::Int { min: 1, max: 3 };

        for _ in 0..100 {
            let value = evaluate(&spec, "qty", &ctx("orders", &record, &pool), &mut rng).unwrap();
            let i = value.as_i64().unwrap();
            assert!((1..=3).contains(&i));
        }
    }

    #[test]
    fn test_float_rounds_to_cents() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = ReferencePool::new();
        let record = Record::new();
        let spec = FieldSpec::Float {
            min: 10.0,
            max: 500.0,
        };

        let value = evaluate(&spec, "amount", &ctx("orders", &record, &pool), &mut rng).unwrap();
        let f = value.as_f64().unwrap();
        assert!((10.0..=500.0).contains(&f));
        assert!(((f * 100.0).round() - f * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_choice_weighted_skews() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = ReferencePool::new();
        let record = Record::new();
        let spec = FieldSpec::Choice {
            choices: vec![Value::String("a".into()), Value::String("b".into())],
            weights: Some(vec![0.95, 0.05]),
        };

        let mut a_count = 0;
        for _ in 0..1000 {
            let v = evaluate(&spec, "status", &ctx("orders", &record, &pool), &mut rng).unwrap();
            if v.as_str() == Some("a") {
                a_count += 1;
            }
        }
        assert!(a_count > 850, "weighted choice too flat: {a_count}/1000");
    }

    #[test]
    fn test_reference_copies_parent_field() {
        let pool = ReferencePool::new();
        let mut parent = Record::new();
        parent.insert("order_id", Value::String("ORDER_00001".into()));
        parent.insert("total_amount", Value::Float(123.45));
        pool.append("orders", "ORDER_00001".to_string(), parent);

        let mut record = Record::new();
        record.insert("order_id", Value::String("ORDER_00001".into()));

        let mut rng = StdRng::seed_from_u64(42);
        let spec = FieldSpec::Reference {
            source: "orders.total_amount".into(),
            via: "order_id".into(),
        };
        let value = evaluate(&spec, "amount", &ctx("payments", &record, &pool), &mut rng).unwrap();
        assert_eq!(value, Value::Float(123.45));
    }

    #[test]
    fn test_reference_missing_parent() {
        let pool = ReferencePool::new();
        pool.append("orders", "ORDER_00001".to_string(), Record::new());

        let mut record = Record::new();
        record.insert("order_id", Value::String("ORDER_99999".into()));

        let mut rng = StdRng::seed_from_u64(42);
        let spec = FieldSpec::Reference {
            source: "orders.total_amount".into(),
            via: "order_id".into(),
        };
        let err = evaluate(&spec, "amount", &ctx("payments", &record, &pool), &mut rng).unwrap_err();
        assert!(matches!(err, GenError::MissingReference { .. }), "got {err:?}");
    }

    #[test]
    fn test_not_yet_bound_template_field_drops_the_record() {
        // Declared-but-later fields pass Init validation; if evaluation
        // order leaves the token unbound, the record is dropped.
        let pool = ReferencePool::new();
        let record = Record::new();
        let mut rng = StdRng::seed_from_u64(42);
        let spec = FieldSpec::String {
            format: Some("{region}-x".into()),
            initial_value: None,
        };
        let err = evaluate(&spec, "label", &ctx("orders", &record, &pool), &mut rng).unwrap_err();
        assert!(matches!(err, GenError::Generation { .. }));
    }
}
