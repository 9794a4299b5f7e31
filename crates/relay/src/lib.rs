//! Bridge between an HTTP ingress and a publish/subscribe broker.
//!
//! This crate holds the broker-facing half: connecting, idempotent
//! provisioning of the topic and subscription, and the consume loop. The HTTP
//! publish gateway lives in `relay-http`.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod context;
pub mod error;
pub mod provision;
pub mod telemetry;

pub use broker::{
    BrokerBackend, BrokerClient, Connection, InMemoryBroker, MessageId, ReceivedMessage,
    Subscription, Topic,
};
pub use config::RelayConfig;
pub use consumer::{
    ConsumeLoop, ConsumeStats, ConsumerSettings, Delivery, DeliveryHandler, HandlerError,
    LoggingHandler,
};
pub use context::RelayContext;
pub use error::{BrokerError, RelayError, ResourceKind};

/// A publish request payload: one opaque string.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub data: String,
}

impl Message {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.data.into_bytes()
    }
}
