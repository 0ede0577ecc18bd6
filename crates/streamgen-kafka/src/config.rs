//! Broker configuration document.
//!
//! A flat JSON object of librdkafka-style `key: value` pairs, plus the
//! schema registry URL. Recognised keys are applied on top of the producer
//! defaults; unrecognised keys pass through to the client verbatim.

use crate::error::{Error, Result};
use rdkafka::ClientConfig;
use std::path::Path;

/// Key that routes to the schema registry client instead of librdkafka.
const SCHEMA_REGISTRY_URL: &str = "schema.registry.url";

/// Parsed broker configuration.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    entries: Vec<(String, String)>,
}

impl BrokerConfig {
    /// Load the configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::InvalidConfig(format!(
                "failed to read broker config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parse the configuration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::InvalidConfig(format!("broker config is not valid JSON: {e}")))?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::InvalidConfig(
                "broker config must be a JSON object".to_string(),
            ));
        };

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let rendered = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "broker config key '{key}' has unsupported value {other}"
                    )));
                }
            };
            entries.push((key, rendered));
        }
        Ok(Self { entries })
    }

    /// Build a config from explicit pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The broker bootstrap list.
    pub fn bootstrap_servers(&self) -> Option<&str> {
        self.get("bootstrap.servers")
    }

    /// The schema registry base URL, if configured.
    pub fn schema_registry_url(&self) -> Option<&str> {
        self.get(SCHEMA_REGISTRY_URL)
    }

    /// Build the librdkafka client configuration: producer defaults first,
    /// then every entry except the registry URL on top.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("message.timeout.ms", "30000")
            .set("queue.buffering.max.messages", "100000")
            .set("queue.buffering.max.kbytes", "1048576")
            .set("batch.size", "65536")
            .set("linger.ms", "5");
        for (key, value) in &self.entries {
            if key != SCHEMA_REGISTRY_URL {
                config.set(key, value);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recognised_keys() {
        let config = BrokerConfig::from_json(
            r#"{
                "bootstrap.servers": "broker-1:9092,broker-2:9092",
                "security.protocol": "SASL_SSL",
                "sasl.mechanism": "PLAIN",
                "sasl.username": "svc",
                "sasl.password": "secret",
                "schema.registry.url": "http://registry:8081",
                "linger.ms": 20
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.bootstrap_servers(),
            Some("broker-1:9092,broker-2:9092")
        );
        assert_eq!(
            config.schema_registry_url(),
            Some("http://registry:8081")
        );
    }

    #[test]
    fn test_client_config_excludes_registry_url() {
        let config = BrokerConfig::from_json(
            r#"{"bootstrap.servers": "localhost:9092", "schema.registry.url": "http://r:8081"}"#,
        )
        .unwrap();
        let client = config.client_config();
        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client.get("schema.registry.url"), None);
        // Numeric override rendered as a librdkafka string.
        assert_eq!(client.get("linger.ms"), Some("5"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(BrokerConfig::from_json("[1, 2]").is_err());
        assert!(BrokerConfig::from_json(r#"{"x": [1]}"#).is_err());
    }
}
