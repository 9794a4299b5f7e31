pub mod backend;
pub mod connection;
pub mod memory;
pub mod rest;
pub mod r#trait;
pub mod types;

// Re-exports for ergonomics
pub use backend::BrokerBackend;
pub use connection::Connection;
pub use memory::{InMemoryBroker, MemorySession};
pub use rest::{RestClient, RestConfig};
pub use r#trait::BrokerClient;
pub use types::{MessageId, ReceivedMessage, Subscription, Topic};
