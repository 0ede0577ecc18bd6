//! Wire-format encoders.
//!
//! Two formats ship to the broker: plain UTF-8 JSON (field order is the
//! record's insertion order) and schema-framed binary: a single `0x00` magic
//! byte, the big-endian 4-byte subject-version ID from the schema registry,
//! then the proto3-encoded payload under the entity's registered schema.

use crate::error::{Error, Result};
use crate::registry::SchemaRegistryClient;
use protobuf::CodedOutputStream;
use std::collections::HashMap;
use std::sync::Mutex;
use streamgen_core::config::{split_reference, FieldSpec, TimestampFormat};
use streamgen_core::{CorrelationConfig, EntityConfig, Record, Value};

/// Output wire format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// One JSON document per broker message.
    Json,
    /// Schema-registry framed binary.
    Binary,
}

/// Field names that are promoted into a nested `Address` sub-message in
/// binary mode. In JSON mode they stay flat at the top level.
const ADDRESS_FIELDS: [&str; 5] = ["street", "city", "postal_code", "country_code", "phone"];

/// Proto scalar type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtoKind {
    String,
    Int64,
    Double,
    Bool,
}

impl ProtoKind {
    fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Double => "double",
            Self::Bool => "bool",
        }
    }
}

#[derive(Debug, Clone)]
struct CodecField {
    name: String,
    number: u32,
    kind: ProtoKind,
}

#[derive(Debug, Clone)]
struct NestedCodec {
    /// Field number of the sub-message in the parent.
    number: u32,
    fields: Vec<CodecField>,
}

/// Per-entity encoding plan: declared fields in order, their proto field
/// numbers, and the nested-address promotion.
#[derive(Debug, Clone)]
pub struct EntityCodec {
    message_name: String,
    subject: String,
    fields: Vec<CodecField>,
    nested: Option<NestedCodec>,
}

impl EntityCodec {
    /// Build the codec for one entity. Field numbering follows generation
    /// order with the ID field first; address-part fields are folded into
    /// the nested sub-message.
    pub fn new(entity: &str, cfg: &EntityConfig, config: &CorrelationConfig) -> Self {
        let id_field = cfg.resolved_id_field(entity);
        let mut declared: Vec<(String, ProtoKind)> = Vec::new();
        let push = |declared: &mut Vec<(String, ProtoKind)>, name: &str, kind: ProtoKind| {
            if !declared.iter().any(|(n, _)| n == name) {
                declared.push((name.to_string(), kind));
            }
        };

        push(&mut declared, &id_field, ProtoKind::String);
        for (name, _) in &cfg.relationships {
            push(&mut declared, name, ProtoKind::String);
        }
        for (name, spec) in cfg.schema.iter().chain(cfg.derived_fields.iter()) {
            push(&mut declared, name, kind_of(spec, config, 4));
        }

        let mut fields = Vec::new();
        let mut nested_fields = Vec::new();
        let mut number = 1u32;
        for (name, kind) in declared {
            if ADDRESS_FIELDS.contains(&name.as_str()) {
                nested_fields.push(CodecField {
                    name,
                    number: nested_fields.len() as u32 + 1,
                    kind,
                });
            } else {
                fields.push(CodecField { name, number, kind });
                number += 1;
            }
        }
        let nested = (!nested_fields.is_empty()).then_some(NestedCodec {
            number,
            fields: nested_fields,
        });

        Self {
            message_name: capitalize(entity),
            subject: format!("{}-value", cfg.kafka_topic),
            fields,
            nested,
        }
    }

    /// Registry subject this entity registers under (`<topic>-value`).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Render the proto3 schema text registered for this entity.
    pub fn proto_schema(&self) -> String {
        let mut proto = String::new();
        proto.push_str("syntax = \"proto3\";\n");
        proto.push_str("package streamgen;\n\n");

        if let Some(nested) = &self.nested {
            proto.push_str("message Address {\n");
            for field in &nested.fields {
                proto.push_str(&format!(
                    "  {} {} = {};\n",
                    field.kind.type_name(),
                    field.name,
                    field.number
                ));
            }
            proto.push_str("}\n\n");
        }

        proto.push_str(&format!("message {} {{\n", self.message_name));
        for field in &self.fields {
            proto.push_str(&format!(
                "  {} {} = {};\n",
                field.kind.type_name(),
                field.name,
                field.number
            ));
        }
        if let Some(nested) = &self.nested {
            proto.push_str(&format!("  Address address = {};\n", nested.number));
        }
        proto.push_str("}\n");
        proto
    }

    /// Encode a record to proto3 wire format. Keys without a declared slot
    /// are dropped; address-part fields move into the nested sub-message.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut stream = CodedOutputStream::vec(&mut buffer);
            for field in &self.fields {
                if let Some(value) = record.get(&field.name) {
                    write_value(&mut stream, field.number, value)?;
                }
            }
            if let Some(nested) = &self.nested {
                let nested_bytes = encode_nested(nested, record)?;
                if !nested_bytes.is_empty() {
                    stream
                        .write_bytes(nested.number, &nested_bytes)
                        .map_err(|e| Error::Encoding(e.to_string()))?;
                }
            }
            stream.flush().map_err(|e| Error::Encoding(e.to_string()))?;
        }
        Ok(buffer)
    }
}

fn encode_nested(nested: &NestedCodec, record: &Record) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut stream = CodedOutputStream::vec(&mut buffer);
        for field in &nested.fields {
            if let Some(value) = record.get(&field.name) {
                write_value(&mut stream, field.number, value)?;
            }
        }
        stream.flush().map_err(|e| Error::Encoding(e.to_string()))?;
    }
    Ok(buffer)
}

/// Write one value by its runtime type. Proto3 wire format: tag =
/// `(field_number << 3) | wire_type`, with varint (0), 64-bit (1), and
/// length-delimited (2) wire types.
fn write_value(stream: &mut CodedOutputStream<'_>, number: u32, value: &Value) -> Result<()> {
    let result = match value {
        Value::Null => Ok(()),
        Value::Bool(b) => stream.write_bool(number, *b),
        Value::Int(i) => stream.write_int64(number, *i),
        Value::Float(f) => stream.write_double(number, *f),
        Value::String(s) => stream.write_string(number, s),
        Value::Array(values) => {
            for element in values {
                write_value(stream, number, element)?;
            }
            Ok(())
        }
        Value::Map(_) => {
            let json = serde_json::to_string(value).map_err(|e| Error::Encoding(e.to_string()))?;
            return stream
                .write_string(number, &json)
                .map_err(|e| Error::Encoding(e.to_string()));
        }
    };
    result.map_err(|e| Error::Encoding(e.to_string()))
}

/// Infer the proto type for a field descriptor. `reference` descriptors
/// take the type of the field they copy from the parent entity.
fn kind_of(spec: &FieldSpec, config: &CorrelationConfig, depth: u8) -> ProtoKind {
    match spec {
        FieldSpec::Int { .. } => ProtoKind::Int64,
        FieldSpec::Float { .. } => ProtoKind::Double,
        FieldSpec::Timestamp {
            format: TimestampFormat::Epoch,
        } => ProtoKind::Int64,
        FieldSpec::Choice { choices, .. } => {
            if choices.iter().all(|c| matches!(c, Value::Int(_))) {
                ProtoKind::Int64
            } else if choices.iter().all(|c| c.as_f64().is_some()) {
                ProtoKind::Double
            } else if choices.iter().all(|c| matches!(c, Value::Bool(_))) {
                ProtoKind::Bool
            } else {
                ProtoKind::String
            }
        }
        FieldSpec::Reference { source, .. } if depth > 0 => {
            let Some((entity, field)) = split_reference(source) else {
                return ProtoKind::String;
            };
            let Some(cfg) = config.entity(entity) else {
                return ProtoKind::String;
            };
            cfg.schema
                .iter()
                .chain(cfg.derived_fields.iter())
                .find(|(n, _)| n == field)
                .map(|(_, spec)| kind_of(spec, config, depth - 1))
                .unwrap_or(ProtoKind::String)
        }
        _ => ProtoKind::String,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// Schema-framed binary encoder with a per-subject ID cache.
#[derive(Debug, Default)]
pub struct FramedEncoder {
    registry: Option<SchemaRegistryClient>,
    ids: Mutex<HashMap<String, u32>>,
}

impl FramedEncoder {
    /// Encoder that registers schemas through the given registry client on
    /// first use per subject.
    pub fn new(registry: SchemaRegistryClient) -> Self {
        Self {
            registry: Some(registry),
            ids: Mutex::new(HashMap::new()),
        }
    }

    /// Encoder with no registry access; every subject must be preregistered.
    /// Used by dry runs, which may not open network connections.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Seed the ID cache for a subject without a registry round-trip.
    pub fn preregister(&self, subject: &str, id: u32) {
        self.ids
            .lock()
            .expect("id cache poisoned")
            .insert(subject.to_string(), id);
    }

    /// Frame a record: magic byte, big-endian subject-version ID, proto3
    /// payload.
    pub async fn encode(&self, codec: &EntityCodec, record: &Record) -> Result<Vec<u8>> {
        let id = self.subject_id(codec).await?;
        let payload = codec.encode(record)?;

        let mut framed = Vec::with_capacity(5 + payload.len());
        framed.push(0x00);
        framed.extend_from_slice(&id.to_be_bytes());
        framed.extend_from_slice(&payload);
        Ok(framed)
    }

    async fn subject_id(&self, codec: &EntityCodec) -> Result<u32> {
        if let Some(id) = self
            .ids
            .lock()
            .expect("id cache poisoned")
            .get(codec.subject())
        {
            return Ok(*id);
        }

        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| Error::SchemaRegistration {
                subject: codec.subject().to_string(),
                reason: "no schema registry configured".to_string(),
            })?;
        let id = registry.register(codec.subject(), &codec.proto_schema()).await?;
        self.ids
            .lock()
            .expect("id cache poisoned")
            .insert(codec.subject().to_string(), id);
        tracing::info!(subject = codec.subject(), id, "registered schema");
        Ok(id)
    }
}

/// Format-polymorphic encoder handed to the orchestrator.
#[derive(Debug)]
pub enum Encoder {
    /// UTF-8 JSON text.
    Json,
    /// Length-prefixed schema-registry framing.
    Framed(FramedEncoder),
}

impl Encoder {
    /// Serialize one record for the given entity.
    pub async fn encode(&self, codec: &EntityCodec, record: &Record) -> Result<Vec<u8>> {
        match self {
            Self::Json => serde_json::to_vec(record).map_err(|e| Error::Encoding(e.to_string())),
            Self::Framed(framed) => framed.encode(codec, record).await,
        }
    }
}
