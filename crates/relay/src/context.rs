use crate::broker::{Connection, Subscription, Topic};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::provision::{ensure_subscription, ensure_topic};

/// Broker session plus the provisioned resources, built once at startup and
/// handed to the publish gateway and the consume loop.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub connection: Connection,
    pub topic: Topic,
    pub subscription: Subscription,
}

impl RelayContext {
    /// Connect and make sure the topic and subscription exist.
    ///
    /// The connection is closed again if provisioning fails.
    pub async fn bootstrap(config: &RelayConfig) -> Result<Self, RelayError> {
        let connection = config.backend.connect(&config.project).await?;
        match Self::provision(&connection, config).await {
            Ok((topic, subscription)) => Ok(Self {
                connection,
                topic,
                subscription,
            }),
            Err(e) => {
                let _ = connection.close().await;
                Err(e)
            }
        }
    }

    async fn provision(
        connection: &Connection,
        config: &RelayConfig,
    ) -> Result<(Topic, Subscription), RelayError> {
        let topic = ensure_topic(connection, &config.topic).await?.into_inner();
        let subscription =
            ensure_subscription(connection, &config.subscription, &topic, config.ack_deadline)
                .await?
                .into_inner();
        Ok((topic, subscription))
    }
}
