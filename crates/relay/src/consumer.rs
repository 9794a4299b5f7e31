//! Cancellable consume loop: pull, dispatch concurrently, acknowledge.

use crate::broker::{BrokerClient, Connection, ReceivedMessage, Subscription};
use crate::error::RelayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Upper bound on a single pull.
    pub max_messages: usize,
    /// Handlers allowed to run at once.
    pub max_outstanding: usize,
    /// Consecutive pull failures tolerated before the loop gives up.
    pub max_pull_failures: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            max_outstanding: 64,
            max_pull_failures: 5,
        }
    }
}

/// Error a [`DeliveryHandler`] returns to withhold acknowledgment.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct HandlerError {
    pub reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// One delivered message together with its acknowledgment capability.
///
/// `ack` and `nack` consume the delivery, so at most one terminal action is
/// ever taken.
pub struct Delivery {
    message: ReceivedMessage,
    subscription: Subscription,
    client: Arc<dyn BrokerClient>,
}

impl Delivery {
    pub fn new(
        message: ReceivedMessage,
        subscription: Subscription,
        client: Arc<dyn BrokerClient>,
    ) -> Self {
        Self {
            message,
            subscription,
            client,
        }
    }

    pub fn message_id(&self) -> &str {
        self.message.message_id.as_str()
    }

    pub fn data(&self) -> &[u8] {
        &self.message.data
    }

    pub fn data_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message.data)
    }

    pub fn delivery_attempt(&self) -> u32 {
        self.message.delivery_attempt
    }

    pub fn publish_time(&self) -> DateTime<Utc> {
        self.message.publish_time
    }

    pub async fn ack(self) -> Result<(), RelayError> {
        self.client
            .acknowledge(&self.subscription, std::slice::from_ref(&self.message.ack_id))
            .await
            .map_err(|e| RelayError::Delivery {
                message_id: self.message.message_id.to_string(),
                reason: format!("ack failed: {e}"),
            })
    }

    /// Hand the message back for immediate redelivery.
    pub async fn nack(self) -> Result<(), RelayError> {
        self.client
            .modify_ack_deadline(
                &self.subscription,
                std::slice::from_ref(&self.message.ack_id),
                Duration::ZERO,
            )
            .await
            .map_err(|e| RelayError::Delivery {
                message_id: self.message.message_id.to_string(),
                reason: format!("nack failed: {e}"),
            })
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message.message_id)
            .field("delivery_attempt", &self.message.delivery_attempt)
            .field("subscription", &self.subscription.name())
            .finish()
    }
}

/// Per-message processing. `Ok` acknowledges the delivery, `Err` nacks it.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// Logs each payload; never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl DeliveryHandler for LoggingHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        info!(
            message_id = delivery.message_id(),
            attempt = delivery.delivery_attempt(),
            "Received message: {}",
            delivery.data_str()
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    received: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    ack_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> ConsumeStats {
        ConsumeStats {
            received: self.received.load(Ordering::SeqCst),
            acked: self.acked.load(Ordering::SeqCst),
            nacked: self.nacked.load(Ordering::SeqCst),
            ack_failures: self.ack_failures.load(Ordering::SeqCst),
        }
    }
}

/// Totals for one run of the consume loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub received: u64,
    pub acked: u64,
    pub nacked: u64,
    pub ack_failures: u64,
}

pub struct ConsumeLoop {
    connection: Connection,
    subscription: Subscription,
    settings: ConsumerSettings,
}

impl ConsumeLoop {
    pub fn new(
        connection: Connection,
        subscription: Subscription,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            connection,
            subscription,
            settings,
        }
    }

    /// Pull and dispatch deliveries until `cancel` fires or pulling fails
    /// `max_pull_failures` times in a row.
    ///
    /// In-flight handlers are always allowed to finish before this returns.
    pub async fn run<H: DeliveryHandler>(
        self,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<ConsumeStats, RelayError> {
        let client = Arc::clone(self.connection.client());
        let max_outstanding = self.settings.max_outstanding.max(1);
        let max_messages = self.settings.max_messages.max(1);
        let max_pull_failures = self.settings.max_pull_failures.max(1);
        let semaphore = Arc::new(Semaphore::new(max_outstanding));
        let stats = Arc::new(StatsCounters::default());
        let mut in_flight = JoinSet::new();
        let mut consecutive_failures = 0u32;
        let mut outcome = Ok(());

        info!(subscription = %self.subscription, max_outstanding, "Starting message consumer...");

        loop {
            while let Some(result) = in_flight.try_join_next() {
                if let Err(e) = result {
                    error!("Delivery task panicked: {e}");
                }
            }

            let available = semaphore.available_permits();
            if available == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some(result) = in_flight.join_next() => {
                        if let Err(e) = result {
                            error!("Delivery task panicked: {e}");
                        }
                    }
                }
                continue;
            }

            let pulled = tokio::select! {
                _ = cancel.cancelled() => break,
                result = client.pull(&self.subscription, available.min(max_messages)) => result,
            };

            match pulled {
                Ok(messages) => {
                    consecutive_failures = 0;
                    if !messages.is_empty() {
                        debug!(count = messages.len(), "Pulled deliveries");
                    }
                    for message in messages {
                        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                            break;
                        };
                        stats.received.fetch_add(1, Ordering::SeqCst);
                        let delivery =
                            Delivery::new(message, self.subscription.clone(), Arc::clone(&client));
                        in_flight.spawn(dispatch(
                            delivery,
                            Arc::clone(&handler),
                            Arc::clone(&stats),
                            permit,
                        ));
                    }
                }
                Err(source) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= max_pull_failures {
                        error!(
                            subscription = %self.subscription,
                            attempts = consecutive_failures,
                            "Failed to consume messages: {source}"
                        );
                        outcome = Err(RelayError::Pull {
                            subscription: self.subscription.name().to_string(),
                            attempts: consecutive_failures,
                            source,
                        });
                        break;
                    }
                    let delay = retry_delay(consecutive_failures);
                    warn!(
                        attempt = consecutive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Pull failed, retrying: {source}"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "Draining in-flight deliveries");
        }
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("Delivery task panicked: {e}");
            }
        }

        let totals = stats.snapshot();
        info!(
            received = totals.received,
            acked = totals.acked,
            nacked = totals.nacked,
            ack_failures = totals.ack_failures,
            "Message consumer stopped"
        );
        outcome.map(|()| totals)
    }
}

/// Exponential backoff starting at 200ms, capped at 5s.
fn retry_delay(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    INITIAL_RETRY_DELAY
        .saturating_mul(2u32.pow(exponent))
        .min(MAX_RETRY_DELAY)
}

async fn dispatch<H: DeliveryHandler>(
    delivery: Delivery,
    handler: Arc<H>,
    stats: Arc<StatsCounters>,
    _permit: OwnedSemaphorePermit,
) {
    match handler.handle(&delivery).await {
        Ok(()) => match delivery.ack().await {
            Ok(()) => {
                stats.acked.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                stats.ack_failures.fetch_add(1, Ordering::SeqCst);
                warn!("{e}; message will be redelivered after its ack deadline");
            }
        },
        Err(handler_error) => {
            warn!(
                message_id = delivery.message_id(),
                "Handler failed, withholding ack: {handler_error}"
            );
            match delivery.nack().await {
                Ok(()) => {
                    stats.nacked.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    stats.ack_failures.fetch_add(1, Ordering::SeqCst);
                    warn!("{e}");
                }
            }
        }
    }
}
