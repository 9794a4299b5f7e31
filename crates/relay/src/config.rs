//! Command-line and environment configuration shared by the binaries.

use crate::broker::rest::DEFAULT_ENDPOINT;
use crate::broker::{BrokerBackend, RestConfig};
use clap::{Args, ValueEnum};
use std::time::Duration;

pub const DEFAULT_PROJECT_ID: &str = "your-project-id";
pub const DEFAULT_TOPIC_ID: &str = "my-topic";
pub const DEFAULT_SUBSCRIPTION_ID: &str = "my-subscription";
pub const DEFAULT_ACK_DEADLINE_SECS: u64 = 10;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BrokerKind {
    Memory,
    Rest,
}

/// Broker and resource options common to `relay` and `provision`.
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// Cloud project that owns the topic and subscription
    #[arg(long, env = "PUBSUB_PROJECT_ID", default_value = DEFAULT_PROJECT_ID)]
    pub project: String,

    /// Topic id
    #[arg(long, default_value = DEFAULT_TOPIC_ID)]
    pub topic: String,

    /// Subscription id
    #[arg(long, default_value = DEFAULT_SUBSCRIPTION_ID)]
    pub subscription: String,

    /// Ack deadline applied when the subscription is created, in seconds
    #[arg(long, default_value_t = DEFAULT_ACK_DEADLINE_SECS)]
    pub ack_deadline_secs: u64,

    /// Broker backend: memory or rest
    #[arg(long, value_enum, default_value_t = BrokerKind::Rest)]
    pub broker: BrokerKind,

    /// Pub/Sub emulator host (host:port); overrides --endpoint
    #[arg(long, env = "PUBSUB_EMULATOR_HOST")]
    pub emulator_host: Option<String>,

    /// Pub/Sub REST endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// OAuth2 bearer token for the REST endpoint
    #[arg(long, env = "PUBSUB_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Timeout for each REST request in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,
}

impl BrokerArgs {
    pub fn backend(&self) -> BrokerBackend {
        match self.broker {
            BrokerKind::Memory => BrokerBackend::new_memory(),
            BrokerKind::Rest => {
                let mut config = match &self.emulator_host {
                    Some(host) => RestConfig::emulator(host),
                    None => RestConfig {
                        endpoint: self.endpoint.clone(),
                        access_token: self.access_token.clone(),
                        ..RestConfig::default()
                    },
                };
                config.request_timeout = Duration::from_secs(self.request_timeout_secs);
                BrokerBackend::new_rest(config)
            }
        }
    }

    pub fn to_config(&self) -> RelayConfig {
        RelayConfig {
            project: self.project.clone(),
            topic: self.topic.clone(),
            subscription: self.subscription.clone(),
            ack_deadline: Duration::from_secs(self.ack_deadline_secs),
            backend: self.backend(),
        }
    }
}

/// Everything needed to connect and provision.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub project: String,
    pub topic: String,
    pub subscription: String,
    pub ack_deadline: Duration,
    pub backend: BrokerBackend,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT_ID.to_string(),
            topic: DEFAULT_TOPIC_ID.to_string(),
            subscription: DEFAULT_SUBSCRIPTION_ID.to_string(),
            ack_deadline: Duration::from_secs(DEFAULT_ACK_DEADLINE_SECS),
            backend: BrokerBackend::default(),
        }
    }
}
