use super::{MessageId, ReceivedMessage, Subscription, Topic};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::time::Duration;

/// Operations the relay needs from a publish/subscribe broker.
///
/// Implementations must be safe to call concurrently from many tasks; the relay
/// shares one client between the publish gateway and the consume loop without
/// any locking of its own.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Look up an existing topic.
    async fn get_topic(&self, name: &str) -> Result<Topic, BrokerError>;

    async fn create_topic(&self, name: &str) -> Result<Topic, BrokerError>;

    /// Look up an existing subscription, including its ack deadline.
    async fn get_subscription(&self, name: &str) -> Result<Subscription, BrokerError>;

    async fn create_subscription(
        &self,
        name: &str,
        topic: &Topic,
        ack_deadline: Duration,
    ) -> Result<Subscription, BrokerError>;

    /// Publish one payload and wait for the broker-assigned message id.
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<MessageId, BrokerError>;

    /// Pull up to `max_messages` deliveries. May return an empty batch when
    /// nothing arrived within the backend's wait window.
    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError>;

    async fn acknowledge(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
    ) -> Result<(), BrokerError>;

    /// Change the ack deadline of outstanding deliveries. A zero deadline
    /// makes them eligible for redelivery immediately (nack).
    async fn modify_ack_deadline(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
        ack_deadline: Duration,
    ) -> Result<(), BrokerError>;

    /// Release session state. Calls made afterwards fail with [`BrokerError::Closed`].
    async fn close(&self) -> Result<(), BrokerError>;

    async fn topic_exists(&self, name: &str) -> Result<bool, BrokerError> {
        match self.get_topic(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool, BrokerError> {
        match self.get_subscription(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
