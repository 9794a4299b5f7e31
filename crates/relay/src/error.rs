use std::fmt;
use std::time::Duration;

/// Kind of broker resource an error or handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Topic,
    Subscription,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Topic => write!(f, "Topic"),
            ResourceKind::Subscription => write!(f, "Subscription"),
        }
    }
}

/// Errors reported by a [`BrokerClient`](crate::broker::BrokerClient) implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BrokerError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("Broker unavailable in {context}: {reason}")]
    Unavailable { context: String, reason: String },

    #[error("Broker rejected {context} (status {status}): {reason}")]
    Rejected {
        context: String,
        status: u16,
        reason: String,
    },

    #[error("Unauthenticated in {context}: {reason}")]
    Unauthenticated { context: String, reason: String },

    #[error("Invalid argument in {context}: {reason}")]
    InvalidArgument { context: String, reason: String },

    #[error("Invalid broker response in {context}: {details}")]
    InvalidResponse { context: String, details: String },

    #[error("Broker connection is closed")]
    Closed,
}

impl BrokerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrokerError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, BrokerError::AlreadyExists { .. })
    }

    pub fn unavailable(context: &str, reason: impl fmt::Display) -> Self {
        BrokerError::Unavailable {
            context: context.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_response(context: &str, details: impl fmt::Display) -> Self {
        BrokerError::InvalidResponse {
            context: context.to_string(),
            details: details.to_string(),
        }
    }
}

/// Failure taxonomy of the relay.
///
/// `Connection`, `Provisioning`, `Pull` and `Server` are fatal to the process.
/// `Publish` is contained to one HTTP request, `Delivery` to one message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to create Pub/Sub client for project '{project}': {source}")]
    Connection { project: String, source: BrokerError },

    #[error("Failed to provision {kind} '{name}': {reason}")]
    Provisioning {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("Failed to publish message to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to consume messages from subscription '{subscription}' after {attempts} attempt(s): {source}")]
    Pull {
        subscription: String,
        attempts: u32,
        source: BrokerError,
    },

    #[error("Failed to handle delivery '{message_id}': {reason}")]
    Delivery { message_id: String, reason: String },

    #[error("Server error in {context}: {reason}")]
    Server { context: String, reason: String },
}

impl RelayError {
    /// Whether the error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Connection { .. }
                | RelayError::Provisioning { .. }
                | RelayError::Pull { .. }
                | RelayError::Server { .. }
        )
    }

    pub fn provisioning(kind: ResourceKind, name: &str, reason: impl fmt::Display) -> Self {
        RelayError::Provisioning {
            kind,
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn publish_timeout(topic: &str, timeout: Duration) -> Self {
        RelayError::Publish {
            topic: topic.to_string(),
            reason: format!("no confirmation within {}ms", timeout.as_millis()),
        }
    }

    pub fn server(context: &str, reason: impl fmt::Display) -> Self {
        RelayError::Server {
            context: context.to_string(),
            reason: reason.to_string(),
        }
    }
}
