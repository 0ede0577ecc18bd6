//! streamgen - correlated test data generation for Kafka topic fabrics.
//!
//! Generates master and transactional record streams with cross-stream
//! referential integrity, realistic value distributions, and token-bucket
//! rate limiting, publishing them as JSON or schema-framed binary.
//!
//! The library surface is the [`orchestrator::Orchestrator`] plus the
//! [`generate`] / [`validate`] entry points the CLI dispatches to.

pub mod master;
pub mod orchestrator;

use orchestrator::Orchestrator;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use streamgen_core::{CorrelationConfig, GenError, SourceKind};
use streamgen_generate::validate_fakers;
use streamgen_kafka::{
    BrokerConfig, Encoder, FramedEncoder, KafkaSink, SchemaRegistryClient, Sink, StdoutSink,
    TopicAdmin,
};
use tokio::sync::broadcast;
use tracing::{error, info};

pub use streamgen_kafka::WireFormat;

/// Process exit codes.
pub mod exit {
    /// Run completed with zero failures.
    pub const SUCCESS: i32 = 0;
    /// Runtime error or delivery failures.
    pub const RUNTIME: i32 = 1;
    /// Invalid configuration, reported before any I/O.
    pub const CONFIG: i32 = 2;
    /// Drain deadline expired with messages still in flight.
    pub const DRAIN_TIMEOUT: i32 = 3;
}

/// Options for a generation run.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub format: WireFormat,
    pub clean_topics: bool,
    pub dry_run: bool,
    pub seed: u64,
    pub drain_timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            format: WireFormat::Json,
            clean_topics: false,
            dry_run: false,
            seed: 42,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Load a configuration and run every Init-phase check: structure,
/// reference resolution, faker methods, and CSV source files.
pub fn load_and_validate(config_path: &Path) -> Result<CorrelationConfig, GenError> {
    let config = CorrelationConfig::from_file(config_path)?;
    validate_fakers(&config)?;
    for (entity, cfg) in &config.master_data {
        if cfg.source == SourceKind::Csv {
            if let Some(file) = &cfg.file {
                if !file.exists() {
                    return Err(GenError::config(format!(
                        "master '{entity}': CSV file {} does not exist",
                        file.display()
                    )));
                }
            }
        }
    }
    Ok(config)
}

/// Validate a configuration and exit. Never touches the network.
pub fn validate(config_path: &Path) -> i32 {
    match load_and_validate(config_path) {
        Ok(config) => {
            info!(
                masters = config.master_data.len(),
                transactional = config.transactional_data.len(),
                "configuration is valid"
            );
            for (entity, cfg) in &config.transactional_data {
                for (field, rel) in &cfg.relationships {
                    info!("relationship {entity}.{field} -> {}", rel.references);
                }
            }
            exit::SUCCESS
        }
        Err(e) => {
            error!("configuration invalid: {e}");
            exit::CONFIG
        }
    }
}

/// Run a full generation: Init, clean/create topics, bulk load, streaming,
/// drain. Returns the process exit code.
pub async fn generate(
    config_path: &Path,
    broker_config_path: Option<&Path>,
    opts: GenerateOptions,
) -> i32 {
    let config = match load_and_validate(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration invalid: {e}");
            return exit::CONFIG;
        }
    };

    let (sink, encoder): (Arc<dyn Sink>, Encoder) = if opts.dry_run {
        info!("dry run: writing records to stdout");
        let encoder = match opts.format {
            WireFormat::Json => Encoder::Json,
            WireFormat::Binary => {
                // No network in dry runs: frame with a placeholder ID.
                let framed = FramedEncoder::detached();
                for topic in config.all_topics() {
                    framed.preregister(&format!("{topic}-value"), 0);
                }
                Encoder::Framed(framed)
            }
        };
        (Arc::new(StdoutSink::new()), encoder)
    } else {
        let Some(broker_path) = broker_config_path else {
            error!("--broker-config is required unless --dry-run is set");
            return exit::CONFIG;
        };
        let broker = match BrokerConfig::from_file(broker_path) {
            Ok(broker) => broker,
            Err(e) => {
                error!("{e}");
                return exit::CONFIG;
            }
        };

        let admin = match TopicAdmin::new(&broker) {
            Ok(admin) => admin,
            Err(e) => {
                error!("failed to create admin client: {e}");
                return exit::RUNTIME;
            }
        };
        let topics = config.all_topics();
        if opts.clean_topics {
            if let Err(e) = admin.clean_topics(&topics).await {
                error!("topic cleanup failed: {e}");
                return exit::RUNTIME;
            }
        }
        if let Err(e) = admin.create_topics(&topics).await {
            error!("topic creation failed: {e}");
            return exit::RUNTIME;
        }

        let encoder = match opts.format {
            WireFormat::Json => Encoder::Json,
            WireFormat::Binary => {
                let Some(url) = broker.schema_registry_url() else {
                    error!("binary format requires 'schema.registry.url' in the broker config");
                    return exit::CONFIG;
                };
                Encoder::Framed(FramedEncoder::new(SchemaRegistryClient::new(url)))
            }
        };
        let sink = match KafkaSink::new(&broker) {
            Ok(sink) => sink,
            Err(e) => {
                error!("failed to create producer: {e}");
                return exit::RUNTIME;
            }
        };
        (Arc::new(sink), encoder)
    };

    let orchestrator = Orchestrator::new(
        Arc::new(config),
        sink,
        encoder,
        opts.seed,
        opts.drain_timeout,
    );

    let (shutdown, _) = broadcast::channel(1);
    let signal_tx = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("cancellation requested, draining");
            let _ = signal_tx.send(());
        }
    });

    orchestrator.run(shutdown).await.exit_code()
}

/// Example correlation configuration written by `streamgen example-config`.
pub const EXAMPLE_CONFIG: &str = r#"# streamgen correlation configuration
#
# Masters are bulk-loaded first; transactional streams then emit at their
# configured rates with foreign keys resolved against already-emitted
# records.

master_data:
  customers:
    kafka_topic: customers
    id_field: customer_id
    key_field: customer_id
    source: faker
    count: 100
    bulk_load: true
    schema:
      customer_id:
        type: string
        format: "CUST_{seq:04d}"
      name:
        type: faker
        method: name
      email:
        type: faker
        method: email
      street:
        type: faker
        method: street_address
      city:
        type: faker
        method: city
      postal_code:
        type: faker
        method: postcode
      country_code:
        type: faker
        method: country_code
      created_at:
        type: timestamp
        format: iso8601

transactional_data:
  orders:
    kafka_topic: orders
    id_field: order_id
    key_field: order_id
    rate_per_second: 10
    max_messages: 1000
    track_recent: true
    relationships:
      customer_id:
        references: "customers.customer_id"
        distribution: zipf
        alpha: 1.5
    derived_fields:
      order_id:
        type: string
        format: "ORDER_{seq:05d}"
      order_date:
        type: timestamp
        format: iso8601
      status:
        type: choice
        choices: [pending, confirmed, shipped]
        weights: [0.6, 0.3, 0.1]
      total_amount:
        type: float
        min: 9.99
        max: 499.99

  payments:
    kafka_topic: payments
    key_field: payment_id
    rate_per_second: 8
    max_messages: 800
    relationships:
      order_id:
        references: "orders.order_id"
        recency_bias: true
        max_delay_minutes: 30
    derived_fields:
      payment_id:
        type: string
        format: "PAY_{seq:06d}"
      amount:
        type: reference
        source: "orders.total_amount"
        via: order_id
      payment_method:
        type: choice
        choices: [credit_card, debit_card, cash]
      payment_date:
        type: timestamp
        format: iso8601
      status:
        type: string
        initial_value: completed
"#;

/// Write the example configuration to a file.
pub fn write_example_config(path: &Path) -> i32 {
    match std::fs::write(path, EXAMPLE_CONFIG) {
        Ok(()) => {
            info!("example configuration written to {}", path.display());
            exit::SUCCESS
        }
        Err(e) => {
            error!("failed to write {}: {e}", path.display());
            exit::RUNTIME
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_is_valid() {
        let config = CorrelationConfig::from_yaml(EXAMPLE_CONFIG).unwrap();
        validate_fakers(&config).unwrap();
        assert_eq!(config.master_data.len(), 1);
        assert_eq!(config.transactional_data.len(), 2);
        assert_eq!(config.all_topics(), vec!["customers", "orders", "payments"]);
    }

    #[test]
    fn test_validate_missing_file_is_config_error() {
        let err = load_and_validate(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, GenError::Config(_)));
    }
}
