//! Error taxonomy for the generation pipeline.

use thiserror::Error;

/// Errors raised while validating configuration or building records.
///
/// Callers pattern-match on the variant to decide between dropping the
/// record and continuing, failing the owning task, or aborting the run
/// before any I/O happens.
#[derive(Debug, Error)]
pub enum GenError {
    /// Invalid or inconsistent configuration. Always fatal before I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A transactional stream sampled a parent entity with zero records.
    /// Fatal for the sampling task; other tasks continue.
    #[error("no records available for entity '{0}'")]
    EmptyPool(String),

    /// A reference-typed derived field could not find its parent record.
    /// The in-progress record is dropped.
    #[error("referenced record not found: {entity}[{id}]")]
    MissingReference { entity: String, id: String },

    /// Field evaluation failed. The in-progress record is dropped; the
    /// sequence counter has already advanced.
    #[error("failed to generate field '{field}' of '{entity}': {reason}")]
    Generation {
        entity: String,
        field: String,
        reason: String,
    },
}

impl GenError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Tag a lower-level failure with the entity and field being built.
    pub fn generation(
        entity: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Generation {
            entity: entity.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this failure ends the owning stream task instead of just
    /// dropping the current record.
    pub fn is_task_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::EmptyPool(_))
    }
}
