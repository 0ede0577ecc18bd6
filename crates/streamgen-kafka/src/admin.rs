//! Topic administration.

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use std::time::Duration;
use tracing::info;

const DEFAULT_PARTITIONS: i32 = 3;

/// Thin wrapper over the Kafka admin client for creating and cleaning the
/// topics a run declares.
pub struct TopicAdmin {
    admin: AdminClient<DefaultClientContext>,
}

impl TopicAdmin {
    /// Connect an admin client with the broker configuration.
    pub fn new(broker: &BrokerConfig) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = broker.client_config().create()?;
        Ok(Self { admin })
    }

    /// Create each topic if it does not exist; existing topics are left
    /// untouched.
    pub async fn create_topics(&self, topics: &[String]) -> Result<()> {
        let new_topics: Vec<NewTopic> = topics
            .iter()
            .map(|t| NewTopic::new(t, DEFAULT_PARTITIONS, TopicReplication::Fixed(1)))
            .collect();
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

        let results = self
            .admin
            .create_topics(&new_topics, &opts)
            .await
            .map_err(|e| Error::TopicAdmin(format!("create_topics failed: {e}")))?;

        for result in results {
            match result {
                Ok(topic) => info!("created topic '{topic}'"),
                Err((topic, err)) => {
                    if err == rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists {
                        info!("topic '{topic}' already exists");
                    } else {
                        return Err(Error::TopicAdmin(format!(
                            "failed to create topic '{topic}': {err}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove existing messages on the declared topics by deleting the
    /// topics outright. Topics that do not exist are fine; any other
    /// failure is fatal to the run.
    pub async fn clean_topics(&self, topics: &[String]) -> Result<()> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

        let results = self
            .admin
            .delete_topics(&names, &opts)
            .await
            .map_err(|e| Error::TopicAdmin(format!("delete_topics failed: {e}")))?;

        for result in results {
            match result {
                Ok(topic) => info!("deleted topic '{topic}'"),
                Err((topic, err)) => {
                    if err == rdkafka::types::RDKafkaErrorCode::UnknownTopicOrPartition {
                        info!("topic '{topic}' not present, nothing to clean");
                    } else {
                        return Err(Error::TopicAdmin(format!(
                            "failed to delete topic '{topic}': {err}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
