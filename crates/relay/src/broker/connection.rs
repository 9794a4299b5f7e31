use super::BrokerClient;
use crate::error::RelayError;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide handle to the broker session.
///
/// Cloning is cheap and every clone shares the same client. Call
/// [`Connection::close`] once on shutdown to release the session.
#[derive(Clone)]
pub struct Connection {
    project: String,
    client: Arc<dyn BrokerClient>,
}

impl Connection {
    pub fn new(project: impl Into<String>, client: Arc<dyn BrokerClient>) -> Self {
        Self {
            project: project.into(),
            client,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn client(&self) -> &Arc<dyn BrokerClient> {
        &self.client
    }

    pub async fn close(self) -> Result<(), RelayError> {
        match self.client.close().await {
            Ok(()) => {
                info!(project = %self.project, "Broker connection closed");
                Ok(())
            }
            Err(source) => {
                warn!(project = %self.project, "Failed to close broker connection: {source}");
                Err(RelayError::Connection {
                    project: self.project,
                    source,
                })
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}
