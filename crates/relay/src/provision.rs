//! Idempotent provisioning of the relay's topic and subscription.

use crate::broker::{Connection, Subscription, Topic};
use crate::config::RelayConfig;
use crate::error::{RelayError, ResourceKind};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Bounds the broker enforces on a subscription's ack deadline.
pub const MIN_ACK_DEADLINE: Duration = Duration::from_secs(10);
pub const MAX_ACK_DEADLINE: Duration = Duration::from_secs(600);

const MAX_NAME_LEN: usize = 255;

/// Outcome of an `ensure_*` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned<T> {
    Created(T),
    /// Found on the existence check, or created concurrently by someone else.
    Existing(T),
}

impl<T> Provisioned<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Provisioned::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Provisioned::Created(resource) | Provisioned::Existing(resource) => resource,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Provisioned::Created(resource) | Provisioned::Existing(resource) => resource,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Provisioned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provisioned::Created(resource) => write!(f, "created: {resource}"),
            Provisioned::Existing(resource) => write!(f, "already exists: {resource}"),
        }
    }
}

/// Check a topic or subscription id against the broker's naming rules.
pub fn validate_resource_name(kind: ResourceKind, name: &str) -> Result<(), RelayError> {
    if name.len() < 3 || name.len() > MAX_NAME_LEN {
        return Err(RelayError::provisioning(
            kind,
            name,
            format!("name must be between 3 and {MAX_NAME_LEN} characters"),
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(RelayError::provisioning(
            kind,
            name,
            "name must start with a letter",
        ));
    }
    if name.starts_with("goog") {
        return Err(RelayError::provisioning(
            kind,
            name,
            "name must not start with 'goog'",
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || "-_.~+".contains(*c)))
    {
        return Err(RelayError::provisioning(
            kind,
            name,
            format!("invalid character '{c}'"),
        ));
    }
    Ok(())
}

/// Return the topic `name`, creating it if it does not exist.
pub async fn ensure_topic(
    connection: &Connection,
    name: &str,
) -> Result<Provisioned<Topic>, RelayError> {
    validate_resource_name(ResourceKind::Topic, name)?;
    let client = connection.client();

    let exists = client.topic_exists(name).await.map_err(|e| {
        RelayError::provisioning(
            ResourceKind::Topic,
            name,
            format!("failed to check if topic exists: {e}"),
        )
    })?;
    if exists {
        let topic = Topic::new(connection.project(), name);
        info!(topic = %topic, "Topic already exists");
        return Ok(Provisioned::Existing(topic));
    }

    match client.create_topic(name).await {
        Ok(topic) => {
            info!(topic = %topic, "Topic created");
            Ok(Provisioned::Created(topic))
        }
        Err(e) if e.is_already_exists() => {
            warn!(topic = name, "Topic was created concurrently; using it");
            Ok(Provisioned::Existing(Topic::new(connection.project(), name)))
        }
        Err(e) => Err(RelayError::provisioning(
            ResourceKind::Topic,
            name,
            format!("failed to create topic: {e}"),
        )),
    }
}

/// Return the subscription `name` bound to `topic`, creating it with
/// `ack_deadline` if it does not exist.
///
/// An existing subscription keeps the deadline it was created with.
pub async fn ensure_subscription(
    connection: &Connection,
    name: &str,
    topic: &Topic,
    ack_deadline: Duration,
) -> Result<Provisioned<Subscription>, RelayError> {
    validate_resource_name(ResourceKind::Subscription, name)?;
    if ack_deadline < MIN_ACK_DEADLINE || ack_deadline > MAX_ACK_DEADLINE {
        return Err(RelayError::provisioning(
            ResourceKind::Subscription,
            name,
            format!(
                "ack deadline must be between {}s and {}s (got {}s)",
                MIN_ACK_DEADLINE.as_secs(),
                MAX_ACK_DEADLINE.as_secs(),
                ack_deadline.as_secs()
            ),
        ));
    }
    let client = connection.client();

    let exists = client.subscription_exists(name).await.map_err(|e| {
        RelayError::provisioning(
            ResourceKind::Subscription,
            name,
            format!("failed to check if subscription exists: {e}"),
        )
    })?;
    if exists {
        return existing_subscription(connection, name, topic).await;
    }

    match client.create_subscription(name, topic, ack_deadline).await {
        Ok(subscription) => {
            info!(
                subscription = %subscription,
                ack_deadline_secs = subscription.ack_deadline().as_secs(),
                "Subscription created"
            );
            Ok(Provisioned::Created(subscription))
        }
        Err(e) if e.is_already_exists() => {
            warn!(subscription = name, "Subscription was created concurrently; using it");
            existing_subscription(connection, name, topic).await
        }
        Err(e) => Err(RelayError::provisioning(
            ResourceKind::Subscription,
            name,
            format!("failed to create subscription: {e}"),
        )),
    }
}

async fn existing_subscription(
    connection: &Connection,
    name: &str,
    topic: &Topic,
) -> Result<Provisioned<Subscription>, RelayError> {
    let subscription = connection
        .client()
        .get_subscription(name)
        .await
        .map_err(|e| {
            RelayError::provisioning(
                ResourceKind::Subscription,
                name,
                format!("failed to load subscription: {e}"),
            )
        })?;
    if subscription.topic() != topic.name() {
        warn!(
            subscription = %subscription,
            bound_topic = subscription.topic(),
            expected_topic = topic.name(),
            "Existing subscription is bound to a different topic"
        );
    }
    info!(subscription = %subscription, "Subscription already exists");
    Ok(Provisioned::Existing(subscription))
}

/// What a provisioning run found or created.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionReport {
    pub topic: Provisioned<Topic>,
    pub subscription: Provisioned<Subscription>,
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Topic {}", self.topic)?;
        write!(
            f,
            "Subscription {} (ack deadline {}s)",
            self.subscription,
            self.subscription.get().ack_deadline().as_secs()
        )
    }
}

/// Connect with `config`, ensure the topic and subscription, then close the
/// connection. A close failure is reported only if provisioning succeeded.
pub async fn provision_resources(config: &RelayConfig) -> Result<ProvisionReport, RelayError> {
    let connection = config.backend.connect(&config.project).await?;

    let result = async {
        let topic = ensure_topic(&connection, &config.topic).await?;
        let subscription = ensure_subscription(
            &connection,
            &config.subscription,
            topic.get(),
            config.ack_deadline,
        )
        .await?;
        Ok::<_, RelayError>(ProvisionReport {
            topic,
            subscription,
        })
    }
    .await;

    let closed = connection.close().await;
    let report = result?;
    closed?;
    Ok(report)
}
