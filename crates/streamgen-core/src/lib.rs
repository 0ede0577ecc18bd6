//! Core types for the streamgen correlated data generator.
//!
//! This crate holds everything the generation and publishing layers share:
//! the uniform [`Value`]/[`Record`] model that records travel through from
//! field generation to wire encoding, the declarative correlation
//! configuration loaded from YAML, and the error taxonomy that drives the
//! drop-record-vs-fail-task decisions upstream.

pub mod config;
pub mod error;
pub mod value;

pub use config::{
    CorrelationConfig, Distribution, EntityConfig, FieldSpec, ReferenceSpec, SourceKind,
    TimestampFormat,
};
pub use error::GenError;
pub use value::{Record, Value};
