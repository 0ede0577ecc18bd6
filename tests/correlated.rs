//! End-to-end orchestrator runs over the in-memory sink.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamgen::orchestrator::{Orchestrator, Summary};
use streamgen_core::CorrelationConfig;
use streamgen_kafka::{Encoder, FramedEncoder, MemorySink, Sink};
use tokio::sync::broadcast;

/// Customers bulk-loaded as masters, orders referencing them, payments
/// referencing orders with a derived amount copied from the matched order.
const CONFIG: &str = r#"
master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    key_field: customer_id
    count: 5
    schema:
      customer_id: {type: string, format: "CUST_{seq:04d}"}
      name: {type: faker, method: name}
transactional_data:
  orders:
    kafka_topic: orders
    id_field: order_id
    key_field: order_id
    rate_per_second: 100
    max_messages: 3
    track_recent: true
    relationships:
      customer_id:
        references: "customers.customer_id"
    derived_fields:
      order_id: {type: string, format: "ORDER_{seq:05d}"}
      total_amount: {type: float, min: 10.0, max: 500.0}
  payments:
    kafka_topic: payments
    rate_per_second: 100
    max_messages: 2
    relationships:
      order_id:
        references: "orders.order_id"
        recency_bias: true
        max_delay_minutes: 30
    derived_fields:
      payment_id: {type: string, format: "PAY_{seq:06d}"}
      amount: {type: reference, source: "orders.total_amount", via: order_id}
"#;

async fn run(config: &str, sink: Arc<MemorySink>, encoder: Encoder) -> Summary {
    let config = Arc::new(CorrelationConfig::from_yaml(config).unwrap());
    let dyn_sink: Arc<dyn Sink> = sink;
    let orchestrator = Orchestrator::new(config, dyn_sink, encoder, 42, Duration::from_secs(5));
    let (shutdown, _) = broadcast::channel(1);
    orchestrator.run(shutdown).await
}

fn json_payloads(sink: &MemorySink, topic: &str) -> Vec<serde_json::Value> {
    sink.messages_for(topic)
        .iter()
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn masters_then_orders_with_referential_integrity() {
    let sink = Arc::new(MemorySink::new());
    let summary = run(CONFIG, Arc::clone(&sink), Encoder::Json).await;

    assert!(!summary.fatal);
    assert_eq!(summary.exit_code(), 0);

    let customers = json_payloads(&sink, "customers");
    let customer_ids: HashSet<String> = customers
        .iter()
        .map(|c| c["customer_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        customer_ids,
        (1..=5).map(|i| format!("CUST_{i:04}")).collect::<HashSet<_>>()
    );

    let orders = json_payloads(&sink, "orders");
    assert_eq!(orders.len(), 3);
    let order_ids: Vec<&str> = orders.iter().map(|o| o["order_id"].as_str().unwrap()).collect();
    assert_eq!(order_ids, vec!["ORDER_00001", "ORDER_00002", "ORDER_00003"]);
    for order in &orders {
        let fk = order["customer_id"].as_str().unwrap();
        assert!(customer_ids.contains(fk), "dangling customer reference {fk}");
    }

    // Partition keys come from key_field.
    for message in sink.messages_for("orders") {
        let payload: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(message.key.as_deref(), payload["order_id"].as_str());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn payments_copy_the_matched_order_amount() {
    let sink = Arc::new(MemorySink::new());
    let summary = run(CONFIG, Arc::clone(&sink), Encoder::Json).await;
    assert_eq!(summary.exit_code(), 0);

    let orders = json_payloads(&sink, "orders");
    let payments = json_payloads(&sink, "payments");
    assert_eq!(payments.len(), 2);

    let payment_ids: Vec<&str> = payments
        .iter()
        .map(|p| p["payment_id"].as_str().unwrap())
        .collect();
    assert_eq!(payment_ids, vec!["PAY_000001", "PAY_000002"]);

    for payment in &payments {
        let order_id = payment["order_id"].as_str().unwrap();
        let order = orders
            .iter()
            .find(|o| o["order_id"].as_str() == Some(order_id))
            .unwrap_or_else(|| panic!("payment references unknown order {order_id}"));
        assert_eq!(
            payment["amount"].as_f64().unwrap(),
            order["total_amount"].as_f64().unwrap(),
            "payment amount diverges from its order"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn summary_counts_every_entity() {
    let sink = Arc::new(MemorySink::new());
    let summary = run(CONFIG, Arc::clone(&sink), Encoder::Json).await;

    let by_entity: std::collections::HashMap<&str, (u64, u64, u64)> = summary
        .entities
        .iter()
        .map(|e| (e.entity.as_str(), (e.sent, e.acked, e.failed)))
        .collect();
    assert_eq!(by_entity["customers"], (5, 5, 0));
    assert_eq!(by_entity["orders"], (3, 3, 0));
    assert_eq!(by_entity["payments"], (2, 2, 0));
    assert_eq!(summary.residual, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn framed_payloads_carry_the_registry_envelope() {
    let framed = FramedEncoder::detached();
    for subject in ["customers-value", "orders-value", "payments-value"] {
        framed.preregister(subject, 7);
    }

    let sink = Arc::new(MemorySink::new());
    let summary = run(CONFIG, Arc::clone(&sink), Encoder::Framed(framed)).await;
    assert_eq!(summary.exit_code(), 0);

    let messages = sink.messages();
    assert_eq!(messages.len(), 10);
    for message in messages {
        assert_eq!(message.payload[0], 0x00, "missing magic byte");
        assert_eq!(&message.payload[1..5], &[0x00, 0x00, 0x00, 0x07]);
        assert!(message.payload.len() > 5, "empty framed payload");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_full_backoff_retries_until_submitted() {
    let sink = Arc::new(MemorySink::new().with_queue_full(3));
    let summary = run(CONFIG, Arc::clone(&sink), Encoder::Json).await;

    // The first three publishes bounce with QueueFull and are retried; no
    // records are lost.
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(sink.messages_for("customers").len(), 5);
    assert_eq!(sink.messages_for("orders").len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_master_fails_only_the_referencing_task() {
    let config = r#"
master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    count: 0
    schema:
      customer_id: {type: string, format: "CUST_{seq:04d}"}
transactional_data:
  orders:
    kafka_topic: orders
    id_field: order_id
    rate_per_second: 100
    max_messages: 3
    relationships:
      customer_id:
        references: "customers.customer_id"
    derived_fields:
      order_id: {type: string, format: "ORDER_{seq:05d}"}
  events:
    kafka_topic: events
    rate_per_second: 100
    max_messages: 2
    derived_fields:
      event_id: {type: string, format: "EVT_{seq:03d}"}
"#;
    let sink = Arc::new(MemorySink::new());
    let summary = run(config, Arc::clone(&sink), Encoder::Json).await;

    assert!(summary.fatal, "empty master must fail the referencing task");
    assert_eq!(summary.exit_code(), 1);
    assert!(sink.messages_for("orders").is_empty());
    // The independent stream still ran to completion.
    assert_eq!(sink.messages_for("events").len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_drains_within_the_deadline() {
    let config = r#"
master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    count: 3
    schema:
      customer_id: {type: string, format: "CUST_{seq:04d}"}
transactional_data:
  orders:
    kafka_topic: orders
    id_field: order_id
    rate_per_second: 500
    relationships:
      customer_id:
        references: "customers.customer_id"
    derived_fields:
      order_id: {type: string, format: "ORDER_{seq:05d}"}
"#;
    let config = Arc::new(CorrelationConfig::from_yaml(config).unwrap());
    let sink = Arc::new(MemorySink::new());
    let dyn_sink: Arc<dyn Sink> = Arc::clone(&sink) as Arc<dyn Sink>;
    let orchestrator =
        Orchestrator::new(config, dyn_sink, Encoder::Json, 42, Duration::from_secs(5));

    let (shutdown, _) = broadcast::channel(1);
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = trigger.send(());
    });

    let started = Instant::now();
    let summary = tokio::time::timeout(Duration::from_secs(3), orchestrator.run(shutdown))
        .await
        .expect("run did not stop after cancellation");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!summary.fatal);
    // The stream was cut mid-flight but everything submitted was accounted.
    assert!(!sink.messages_for("orders").is_empty());
}

#[test]
fn invalid_reference_exits_with_config_code_before_any_io() {
    let config = r#"
master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    schema:
      customer_id: {type: string, format: "CUST_{seq:04d}"}
transactional_data:
  orders:
    kafka_topic: orders
    relationships:
      customer_id:
        references: "vendors.vendor_id"
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config.as_bytes()).unwrap();
    file.flush().unwrap();

    // Validate runs the Init phase only: same result both times, no sink or
    // network involved.
    assert_eq!(streamgen::validate(file.path()), 2);
    assert_eq!(streamgen::validate(file.path()), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn every_emitted_fk_was_in_the_pool_at_submit_time() {
    let config = Arc::new(CorrelationConfig::from_yaml(CONFIG).unwrap());
    let sink = Arc::new(MemorySink::new());
    let dyn_sink: Arc<dyn Sink> = Arc::clone(&sink) as Arc<dyn Sink>;
    let orchestrator =
        Orchestrator::new(config, dyn_sink, Encoder::Json, 42, Duration::from_secs(5));
    let pool = orchestrator.pool();

    let (shutdown, _) = broadcast::channel(1);
    orchestrator.run(shutdown).await;

    for order in json_payloads(&sink, "orders") {
        let fk = order["customer_id"].as_str().unwrap();
        assert!(pool.contains("customers", fk));
    }
    for payment in json_payloads(&sink, "payments") {
        let fk = payment["order_id"].as_str().unwrap();
        assert!(pool.contains("orders", fk));
    }
}
