//! Broker-facing layer for streamgen.
//!
//! Everything between a finished [`streamgen_core::Record`] and the broker
//! lives here: wire encoding ([`encoder`]), schema registration
//! ([`registry`]), the publishing abstraction with delivery accounting
//! ([`sink`]), topic administration ([`admin`]), and the broker
//! configuration document ([`config`]).

pub mod admin;
pub mod config;
pub mod encoder;
pub mod error;
pub mod registry;
pub mod sink;

pub use admin::TopicAdmin;
pub use config::BrokerConfig;
pub use encoder::{Encoder, EntityCodec, FramedEncoder, WireFormat};
pub use error::{Error, Result};
pub use registry::SchemaRegistryClient;
pub use sink::{DeliverySnapshot, KafkaSink, MemorySink, Sink, SinkMessage, StdoutSink};
