//! Schema registry client.
//!
//! Minimal Confluent-style REST surface: register a schema under a subject
//! and get back the subject-version ID that goes into the framed envelope.

use crate::error::{Error, Result};
use serde_json::json;

/// HTTP client for a Confluent-compatible schema registry.
#[derive(Debug, Clone)]
pub struct SchemaRegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl SchemaRegistryClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Register `schema` (proto text) under `subject`, returning the
    /// registry-assigned ID. Registering an identical schema again returns
    /// the existing ID, so this is safe to call per process start.
    pub async fn register(&self, subject: &str, schema: &str) -> Result<u32> {
        let url = format!("{}/subjects/{subject}/versions", self.base_url);
        let body = json!({ "schemaType": "PROTOBUF", "schema": schema });

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/vnd.schemaregistry.v1+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::SchemaRegistration {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::CONFLICT
            || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            return Err(Error::IncompatibleSchema {
                subject: subject.to_string(),
                reason: text,
            });
        }
        if !status.is_success() {
            return Err(Error::SchemaRegistration {
                subject: subject.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| Error::SchemaRegistration {
                subject: subject.to_string(),
                reason: format!("unparseable registry response: {e}"),
            })?;
        parsed
            .get("id")
            .and_then(|id| id.as_u64())
            .map(|id| id as u32)
            .ok_or_else(|| Error::SchemaRegistration {
                subject: subject.to_string(),
                reason: format!("registry response has no id: {text}"),
            })
    }
}
