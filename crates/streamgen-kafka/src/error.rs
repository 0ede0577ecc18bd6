//! Publishing and encoding errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The producer's in-flight queue is full. Callers back off and retry.
    #[error("producer queue full")]
    QueueFull,

    #[error("schema registration failed for subject '{subject}': {reason}")]
    SchemaRegistration { subject: String, reason: String },

    #[error("schema for subject '{subject}' rejected as incompatible: {reason}")]
    IncompatibleSchema { subject: String, reason: String },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),

    #[error("topic administration failed: {0}")]
    TopicAdmin(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the owning stream task (registry rejections)
    /// rather than just dropping the current record.
    pub fn is_task_fatal(&self) -> bool {
        matches!(
            self,
            Self::SchemaRegistration { .. } | Self::IncompatibleSchema { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
