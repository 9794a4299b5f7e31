//! Broker backend selection and connection setup.

use super::{BrokerClient, Connection, InMemoryBroker, RestClient, RestConfig};
use crate::error::{BrokerError, RelayError};
use std::sync::Arc;
use tracing::info;

/// Which broker the relay talks to.
#[derive(Debug, Clone)]
pub enum BrokerBackend {
    /// In-process broker.
    ///
    /// Ephemeral; every connection made from the same backend value shares the
    /// same topics and subscriptions. Suitable for development and testing.
    Memory { broker: Arc<InMemoryBroker> },
    /// Google Cloud Pub/Sub REST API, or a local emulator.
    Rest(RestConfig),
}

impl BrokerBackend {
    pub fn new_memory() -> Self {
        Self::with_memory_broker(Arc::new(InMemoryBroker::new()))
    }

    pub fn with_memory_broker(broker: Arc<InMemoryBroker>) -> Self {
        BrokerBackend::Memory { broker }
    }

    pub fn new_rest(config: RestConfig) -> Self {
        BrokerBackend::Rest(config)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BrokerBackend::Memory { .. } => "memory",
            BrokerBackend::Rest(_) => "rest",
        }
    }

    /// Establish a session for `project`. Failure is a [`RelayError::Connection`].
    pub async fn connect(&self, project: &str) -> Result<Connection, RelayError> {
        if project.trim().is_empty() {
            return Err(RelayError::Connection {
                project: project.to_string(),
                source: BrokerError::InvalidArgument {
                    context: "connect".to_string(),
                    reason: "project id must not be empty".to_string(),
                },
            });
        }

        let client: Arc<dyn BrokerClient> = match self {
            BrokerBackend::Memory { broker } => Arc::new(broker.session(project)),
            BrokerBackend::Rest(config) => {
                let client = RestClient::connect(project, config.clone())
                    .await
                    .map_err(|source| RelayError::Connection {
                        project: project.to_string(),
                        source,
                    })?;
                Arc::new(client)
            }
        };

        info!(project, backend = self.name(), "Connected to broker");
        Ok(Connection::new(project, client))
    }
}

impl Default for BrokerBackend {
    fn default() -> Self {
        Self::new_memory()
    }
}
