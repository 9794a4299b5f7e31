use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Broker-assigned identifier of a published message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a topic that exists on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    project: String,
    name: String,
}

impl Topic {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified resource path, `projects/{project}/topics/{name}`.
    pub fn path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Handle to a subscription bound to a topic.
///
/// The ack deadline is fixed when the subscription is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    project: String,
    name: String,
    topic: String,
    ack_deadline: Duration,
}

impl Subscription {
    pub fn new(
        project: impl Into<String>,
        name: impl Into<String>,
        topic: impl Into<String>,
        ack_deadline: Duration,
    ) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
            topic: topic.into(),
            ack_deadline,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the bound topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn ack_deadline(&self) -> Duration {
        self.ack_deadline
    }

    pub fn path(&self) -> String {
        format!("projects/{}/subscriptions/{}", self.project, self.name)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// A message handed out by a pull, not yet acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: MessageId,
    pub data: Vec<u8>,
    pub publish_time: DateTime<Utc>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_attempt: u32,
}
