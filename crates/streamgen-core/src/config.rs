//! Correlation configuration.
//!
//! The configuration is a YAML document with two top-level sections,
//! `master_data` and `transactional_data`, each mapping an entity name to a
//! descriptor of how that stream is generated and published. Declaration
//! order is preserved everywhere: masters bulk-load in order, and derived
//! fields evaluate in order.

use crate::error::GenError;
use crate::value::Value;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Ordered `name -> T` entries. YAML mappings deserialize through this so
/// declaration order survives.
pub type Entries<T> = Vec<(String, T)>;

fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Entries<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Entries<T>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, T>()? {
                entries.push((name, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}

/// Top-level correlation configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorrelationConfig {
    /// Entities bulk-loaded before any transactional stream starts.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub master_data: Entries<EntityConfig>,

    /// Entities emitted continuously under a rate limit.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub transactional_data: Entries<EntityConfig>,
}

impl CorrelationConfig {
    /// Load and structurally validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GenError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GenError::config(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and structurally validate a configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, GenError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| GenError::config(format!("failed to parse config YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Look up an entity by name in either section.
    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.master_data
            .iter()
            .chain(self.transactional_data.iter())
            .find(|(n, _)| n == name)
            .map(|(_, cfg)| cfg)
    }

    /// The ID field of a declared entity.
    pub fn id_field(&self, name: &str) -> Option<String> {
        self.entity(name).map(|cfg| cfg.resolved_id_field(name))
    }

    /// All Kafka topics declared in the configuration, in declaration order.
    pub fn all_topics(&self) -> Vec<String> {
        self.master_data
            .iter()
            .chain(self.transactional_data.iter())
            .map(|(_, cfg)| cfg.kafka_topic.clone())
            .collect()
    }

    /// Whether `entity` declares `field` anywhere a reference could read it
    /// from: the ID field, the schema, a relationship, or a derived field.
    pub fn declares_field(&self, entity: &str, field: &str) -> bool {
        let Some(cfg) = self.entity(entity) else {
            return false;
        };
        cfg.resolved_id_field(entity) == field
            || cfg.schema.iter().any(|(n, _)| n == field)
            || cfg.relationships.iter().any(|(n, _)| n == field)
            || cfg.derived_fields.iter().any(|(n, _)| n == field)
    }

    /// Structural validation, run before any I/O.
    ///
    /// Checks source requirements, reference targets, and field descriptor
    /// shapes. Faker method names are validated separately by the generator
    /// layer, which owns the method registry.
    pub fn validate(&self) -> Result<(), GenError> {
        let mut seen = Vec::new();
        for (name, _) in self.master_data.iter().chain(self.transactional_data.iter()) {
            if seen.contains(&name) {
                return Err(GenError::config(format!("entity '{name}' declared twice")));
            }
            seen.push(name);
        }

        for (name, cfg) in &self.master_data {
            if cfg.source == SourceKind::Csv && cfg.file.is_none() {
                return Err(GenError::config(format!(
                    "master '{name}' with CSV source must specify 'file'"
                )));
            }
            if cfg.source != SourceKind::Csv && cfg.schema.is_empty() {
                return Err(GenError::config(format!(
                    "master '{name}' requires a schema"
                )));
            }
        }

        for (name, cfg) in self.master_data.iter().chain(self.transactional_data.iter()) {
            if cfg.rate_per_second < 0.0 {
                return Err(GenError::config(format!(
                    "entity '{name}': rate_per_second must not be negative"
                )));
            }
            for (field, spec) in cfg.schema.iter().chain(cfg.derived_fields.iter()) {
                self.validate_field_spec(name, field, spec)?;
            }
        }

        for (name, cfg) in &self.transactional_data {
            for (field, rel) in &cfg.relationships {
                let (target, target_field) = split_reference(&rel.references)
                    .ok_or_else(|| {
                        GenError::config(format!(
                            "invalid reference in '{name}.{field}': expected '<entity>.<field>', got '{}'",
                            rel.references
                        ))
                    })?;
                let target_id = self.id_field(target).ok_or_else(|| {
                    GenError::config(format!(
                        "invalid reference in '{name}.{field}': entity '{target}' is not declared"
                    ))
                })?;
                if target_id != target_field {
                    return Err(GenError::config(format!(
                        "invalid reference in '{name}.{field}': '{target}.{target_field}' \
                         does not match the ID field '{target_id}' of '{target}'"
                    )));
                }
            }
        }

        Ok(())
    }

    fn validate_field_spec(&self, entity: &str, field: &str, spec: &FieldSpec) -> Result<(), GenError> {
        match spec {
            FieldSpec::String {
                format,
                initial_value,
            } => {
                match format {
                    None => {
                        if initial_value.is_none() {
                            return Err(GenError::config(format!(
                                "field '{entity}.{field}': string requires 'format' or 'initial_value'"
                            )));
                        }
                    }
                    Some(template) => {
                        for token in format_tokens(template).map_err(|reason| {
                            GenError::config(format!(
                                "field '{entity}.{field}': {reason} in format '{template}'"
                            ))
                        })? {
                            if let Some(width) = token.strip_prefix("seq:") {
                                if width
                                    .strip_suffix('d')
                                    .and_then(|w| w.parse::<usize>().ok())
                                    .is_none()
                                {
                                    return Err(GenError::config(format!(
                                        "field '{entity}.{field}': malformed sequence token \
                                         '{{{token}}}' in format '{template}'"
                                    )));
                                }
                            } else if !self.declares_field(entity, token) {
                                return Err(GenError::config(format!(
                                    "field '{entity}.{field}': format references unbound \
                                     field '{token}'"
                                )));
                            }
                        }
                    }
                }
            }
            FieldSpec::Int { min, max } => {
                if min > max {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': min {min} exceeds max {max}"
                    )));
                }
            }
            FieldSpec::Float { min, max } => {
                if min > max {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': min {min} exceeds max {max}"
                    )));
                }
            }
            FieldSpec::Choice { choices, weights } => {
                if choices.is_empty() {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': choice requires at least one option"
                    )));
                }
                if let Some(weights) = weights {
                    if weights.len() != choices.len() {
                        return Err(GenError::config(format!(
                            "field '{entity}.{field}': {} weights for {} choices",
                            weights.len(),
                            choices.len()
                        )));
                    }
                }
            }
            FieldSpec::Reference { source, via } => {
                let Some(cfg) = self.entity(entity) else {
                    return Ok(());
                };
                if !cfg.relationships.iter().any(|(n, _)| n == via) {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': 'via' field '{via}' is not a declared relationship"
                    )));
                }
                let (src_entity, src_field) = split_reference(source).ok_or_else(|| {
                    GenError::config(format!(
                        "field '{entity}.{field}': expected source '<entity>.<field>', got '{source}'"
                    ))
                })?;
                if !self.declares_field(src_entity, src_field) {
                    return Err(GenError::config(format!(
                        "field '{entity}.{field}': source '{src_entity}.{src_field}' is not declared"
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

}

/// The `{...}` token contents of a format string, in order.
fn format_tokens(format: &str) -> Result<Vec<&str>, String> {
    let mut tokens = Vec::new();
    let mut rest = format;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err("unterminated token".to_string());
        };
        tokens.push(&after[..end]);
        rest = &after[end + 1..];
    }
    Ok(tokens)
}

/// Split `"entity.field"` into its two parts. Field paths with further dots
/// are kept whole in the field part.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (entity, field) = reference.split_once('.')?;
    if entity.is_empty() || field.is_empty() {
        return None;
    }
    Some((entity, field))
}

/// Where a master entity's records come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated from the schema's field descriptors.
    #[default]
    Faker,
    /// Loaded from a CSV file.
    Csv,
    /// Generated by the correlated generator (transactional default).
    Generator,
}

/// Descriptor for one named record stream.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    /// Output topic.
    pub kafka_topic: String,

    /// ID field name; defaults to the singularized entity name + `_id`.
    #[serde(default)]
    pub id_field: Option<String>,

    /// Partition key field. Absent means null keys (broker default
    /// partitioning).
    #[serde(default)]
    pub key_field: Option<String>,

    /// Record source for masters.
    #[serde(default)]
    pub source: SourceKind,

    /// CSV file path for `source: csv`.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether this master is published during bulk load.
    #[serde(default = "default_true")]
    pub bulk_load: bool,

    /// Exact record count for generated masters.
    #[serde(default)]
    pub count: Option<u64>,

    /// Cap on transactional emissions.
    #[serde(default)]
    pub max_messages: Option<u64>,

    /// Target rate in records per second; 0 means unbounded.
    #[serde(default)]
    pub rate_per_second: f64,

    /// Enable recency-biased sampling of this entity's IDs by downstream
    /// streams.
    #[serde(default)]
    pub track_recent: bool,

    /// Declared schema fields, in order.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub schema: Entries<FieldSpec>,

    /// Foreign-key fields resolved against the reference pool.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub relationships: Entries<ReferenceSpec>,

    /// Fields evaluated after relationships and schema, in order.
    #[serde(default, deserialize_with = "ordered_entries")]
    pub derived_fields: Entries<FieldSpec>,
}

fn default_true() -> bool {
    true
}

impl EntityConfig {
    /// The effective ID field for this entity.
    pub fn resolved_id_field(&self, entity_name: &str) -> String {
        match &self.id_field {
            Some(field) => field.clone(),
            None => {
                let singular = entity_name.strip_suffix('s').unwrap_or(entity_name);
                format!("{singular}_id")
            }
        }
    }

    /// Whether the ID field is produced by a declared descriptor rather than
    /// auto-generated.
    pub fn declares_id_field(&self, entity_name: &str) -> bool {
        let id_field = self.resolved_id_field(entity_name);
        self.schema.iter().any(|(n, _)| *n == id_field)
            || self.relationships.iter().any(|(n, _)| *n == id_field)
            || self.derived_fields.iter().any(|(n, _)| *n == id_field)
    }
}

/// Declarative descriptor for a single field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSpec {
    /// Template string (`format` with `{seq:NNd}` and `{field}` tokens) or
    /// constant (`initial_value`).
    String {
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        initial_value: Option<String>,
    },

    /// Named realistic-data routine, resolved through the faker registry.
    Faker {
        method: String,
        /// Optional `bothify` template: `?` becomes a random letter, `#` a
        /// random digit.
        #[serde(default)]
        text: Option<String>,
    },

    /// Fresh random identifier.
    Uuid,

    /// Uniform bounded integer.
    Int { min: i64, max: i64 },

    /// Uniform bounded float.
    Float { min: f64, max: f64 },

    /// Current wall-clock time.
    Timestamp {
        #[serde(default)]
        format: TimestampFormat,
    },

    /// Pick from a fixed list, optionally weighted.
    Choice {
        choices: Vec<Value>,
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },

    /// Copy a field from the parent record keyed by the value already bound
    /// to the `via` foreign-key field.
    Reference { source: String, via: String },
}

/// Rendering of `timestamp` fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// ISO-8601 / RFC 3339 text.
    #[default]
    Iso8601,
    /// Integer seconds since the Unix epoch.
    Epoch,
}

/// Foreign-key resolution settings for one relationship field.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceSpec {
    /// Target as `"<entity>.<id_field>"`.
    pub references: String,

    /// Sampling distribution over the parent pool.
    #[serde(default)]
    pub distribution: Distribution,

    /// Zipf exponent.
    #[serde(default = "default_alpha")]
    pub alpha: f64,

    /// Restrict sampling to the parent's most recent IDs.
    #[serde(default)]
    pub recency_bias: bool,

    /// Carried for observability only; selection is frequency-based.
    #[serde(default)]
    pub max_delay_minutes: Option<u32>,
}

fn default_alpha() -> f64 {
    1.0
}

impl ReferenceSpec {
    /// The referenced entity name.
    pub fn target_entity(&self) -> &str {
        split_reference(&self.references)
            .map(|(entity, _)| entity)
            .unwrap_or(&self.references)
    }
}

/// Sampling distribution over a parent entity's pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    /// Integer uniform over the whole pool.
    #[default]
    Uniform,
    /// Rank `k` drawn with probability proportional to `1/k^alpha`, mapped
    /// to insertion order so early IDs concentrate probability.
    Zipf,
}
