use super::{BrokerClient, MessageId, ReceivedMessage, Subscription, Topic};
use crate::error::{BrokerError, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry::{Occupied, Vacant};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// How long an empty pull waits for a message before returning an empty batch.
pub const DEFAULT_PULL_WAIT: Duration = Duration::from_millis(500);

/// In-process broker with topic fan-out, ack deadlines and redelivery.
///
/// Shared between any number of [`MemorySession`]s; also exposes fault
/// injection and call counters for tests.
#[derive(Debug)]
pub struct InMemoryBroker {
    topics: DashMap<String, TopicState>,
    subscriptions: DashMap<String, Arc<SubscriptionState>>,
    next_message_id: AtomicU64,
    pull_wait: Duration,
    faults: Faults,
    publish_calls: AtomicU64,
    ack_calls: AtomicU64,
}

#[derive(Debug, Default)]
struct TopicState {
    subscriptions: Vec<String>,
}

#[derive(Debug)]
struct SubscriptionState {
    topic: String,
    ack_deadline: Duration,
    queue: Mutex<SubscriptionQueue>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct SubscriptionQueue {
    pending: VecDeque<StoredMessage>,
    outstanding: HashMap<String, Outstanding>,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: MessageId,
    data: Vec<u8>,
    publish_time: DateTime<Utc>,
    delivery_attempt: u32,
}

#[derive(Debug)]
struct Outstanding {
    message: StoredMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    publish: AtomicBool,
    ack: AtomicBool,
    pulls_remaining: AtomicU32,
    publish_delay_ms: AtomicU64,
}

impl SubscriptionQueue {
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();
        for ack_id in expired {
            if let Some(outstanding) = self.outstanding.remove(&ack_id) {
                self.pending.push_back(outstanding.message);
            }
        }
    }

    fn take(&mut self, max: usize, ack_deadline: Duration, now: Instant) -> Vec<ReceivedMessage> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(mut message) = self.pending.pop_front() else {
                break;
            };
            message.delivery_attempt += 1;
            let ack_id = uuid::Uuid::new_v4().to_string();
            batch.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: message.message_id.clone(),
                data: message.data.clone(),
                publish_time: message.publish_time,
                delivery_attempt: message.delivery_attempt,
            });
            self.outstanding.insert(
                ack_id,
                Outstanding {
                    message,
                    deadline: now + ack_deadline,
                },
            );
        }
        batch
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.outstanding.values().map(|o| o.deadline).min()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_pull_wait(DEFAULT_PULL_WAIT)
    }

    pub fn with_pull_wait(pull_wait: Duration) -> Self {
        InMemoryBroker {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            next_message_id: AtomicU64::new(1),
            pull_wait,
            faults: Faults::default(),
            publish_calls: AtomicU64::new(0),
            ack_calls: AtomicU64::new(0),
        }
    }

    /// Open a client session scoped to `project`.
    pub fn session(self: &Arc<Self>, project: &str) -> MemorySession {
        MemorySession {
            project: project.to_string(),
            broker: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.faults.publish.store(fail, Ordering::SeqCst);
    }

    /// Delay every publish confirmation by `delay`.
    pub fn set_publish_delay(&self, delay: Duration) {
        self.faults
            .publish_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_ack_failure(&self, fail: bool) {
        self.faults.ack.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` pulls fail with [`BrokerError::Unavailable`].
    pub fn fail_next_pulls(&self, count: u32) {
        self.faults.pulls_remaining.store(count, Ordering::SeqCst);
    }

    pub fn publish_calls(&self) -> u64 {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub fn ack_calls(&self) -> u64 {
        self.ack_calls.load(Ordering::SeqCst)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Messages waiting to be pulled from `subscription`.
    pub fn pending_count(&self, subscription: &Subscription) -> usize {
        self.subscriptions
            .get(&subscription.path())
            .map_or(0, |state| state.queue.lock().pending.len())
    }

    /// Deliveries handed out and neither acked nor expired.
    pub fn outstanding_count(&self, subscription: &Subscription) -> usize {
        self.subscriptions
            .get(&subscription.path())
            .map_or(0, |state| state.queue.lock().outstanding.len())
    }

    /// Let every outstanding delivery's ack deadline elapse now.
    pub fn expire_outstanding(&self, subscription: &Subscription) {
        let Some(state) = self
            .subscriptions
            .get(&subscription.path())
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };
        let now = Instant::now();
        {
            let mut queue = state.queue.lock();
            for outstanding in queue.outstanding.values_mut() {
                outstanding.deadline = now;
            }
        }
        state.notify.notify_waiters();
    }

    fn subscription_state(
        &self,
        path: &str,
        name: &str,
    ) -> Result<Arc<SubscriptionState>, BrokerError> {
        self.subscriptions
            .get(path)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrokerError::NotFound {
                kind: ResourceKind::Subscription,
                name: name.to_string(),
            })
    }

    fn take_pull_fault(&self) -> bool {
        self.faults
            .pulls_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Project-scoped client of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct MemorySession {
    project: String,
    broker: Arc<InMemoryBroker>,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    fn topic_path(&self, name: &str) -> String {
        format!("projects/{}/topics/{name}", self.project)
    }

    fn subscription_path(&self, name: &str) -> String {
        format!("projects/{}/subscriptions/{name}", self.project)
    }
}

#[async_trait]
impl BrokerClient for MemorySession {
    async fn get_topic(&self, name: &str) -> Result<Topic, BrokerError> {
        self.ensure_open()?;
        if self.broker.topics.contains_key(&self.topic_path(name)) {
            Ok(Topic::new(&self.project, name))
        } else {
            Err(BrokerError::NotFound {
                kind: ResourceKind::Topic,
                name: name.to_string(),
            })
        }
    }

    async fn create_topic(&self, name: &str) -> Result<Topic, BrokerError> {
        self.ensure_open()?;
        match self.broker.topics.entry(self.topic_path(name)) {
            Occupied(_) => Err(BrokerError::AlreadyExists {
                kind: ResourceKind::Topic,
                name: name.to_string(),
            }),
            Vacant(entry) => {
                entry.insert(TopicState::default());
                Ok(Topic::new(&self.project, name))
            }
        }
    }

    async fn get_subscription(&self, name: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let state = self
            .broker
            .subscription_state(&self.subscription_path(name), name)?;
        Ok(Subscription::new(
            &self.project,
            name,
            state.topic.clone(),
            state.ack_deadline,
        ))
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &Topic,
        ack_deadline: Duration,
    ) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let topic_path = topic.path();
        if !self.broker.topics.contains_key(&topic_path) {
            return Err(BrokerError::NotFound {
                kind: ResourceKind::Topic,
                name: topic.name().to_string(),
            });
        }

        let path = self.subscription_path(name);
        match self.broker.subscriptions.entry(path.clone()) {
            Occupied(_) => {
                return Err(BrokerError::AlreadyExists {
                    kind: ResourceKind::Subscription,
                    name: name.to_string(),
                });
            }
            Vacant(entry) => {
                entry.insert(Arc::new(SubscriptionState {
                    topic: topic.name().to_string(),
                    ack_deadline,
                    queue: Mutex::new(SubscriptionQueue::default()),
                    notify: Notify::new(),
                }));
            }
        }

        if let Some(mut topic_state) = self.broker.topics.get_mut(&topic_path) {
            topic_state.subscriptions.push(path);
        }

        Ok(Subscription::new(
            &self.project,
            name,
            topic.name(),
            ack_deadline,
        ))
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<MessageId, BrokerError> {
        self.ensure_open()?;
        self.broker.publish_calls.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.broker.faults.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.broker.faults.publish.load(Ordering::SeqCst) {
            return Err(BrokerError::unavailable("publish", "simulated publish failure"));
        }

        let subscriptions = match self.broker.topics.get(&topic.path()) {
            Some(state) => state.subscriptions.clone(),
            None => {
                return Err(BrokerError::NotFound {
                    kind: ResourceKind::Topic,
                    name: topic.name().to_string(),
                });
            }
        };

        let message_id = MessageId(
            self.broker
                .next_message_id
                .fetch_add(1, Ordering::SeqCst)
                .to_string(),
        );
        let stored = StoredMessage {
            message_id: message_id.clone(),
            data: payload,
            publish_time: Utc::now(),
            delivery_attempt: 0,
        };

        for path in subscriptions {
            let Some(state) = self
                .broker
                .subscriptions
                .get(&path)
                .map(|entry| Arc::clone(entry.value()))
            else {
                continue;
            };
            state.queue.lock().pending.push_back(stored.clone());
            state.notify.notify_waiters();
        }

        Ok(message_id)
    }

    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        if self.broker.take_pull_fault() {
            return Err(BrokerError::unavailable("pull", "simulated pull failure"));
        }
        let state = self
            .broker
            .subscription_state(&subscription.path(), subscription.name())?;
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let wait_until = Instant::now() + self.broker.pull_wait;
        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_expiry = {
                let now = Instant::now();
                let mut queue = state.queue.lock();
                queue.requeue_expired(now);
                let batch = queue.take(max_messages, state.ack_deadline, now);
                if !batch.is_empty() {
                    return Ok(batch);
                }
                queue.next_expiry()
            };

            if Instant::now() >= wait_until {
                return Ok(Vec::new());
            }
            let wake_at = next_expiry.map_or(wait_until, |expiry| expiry.min(wait_until));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn acknowledge(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.broker.ack_calls.fetch_add(1, Ordering::SeqCst);
        if self.broker.faults.ack.load(Ordering::SeqCst) {
            return Err(BrokerError::unavailable(
                "acknowledge",
                "simulated acknowledge failure",
            ));
        }
        let state = self
            .broker
            .subscription_state(&subscription.path(), subscription.name())?;
        let mut queue = state.queue.lock();
        // Unknown or expired ack ids are ignored; the message is already pending again.
        for ack_id in ack_ids {
            queue.outstanding.remove(ack_id);
        }
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
        ack_deadline: Duration,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.broker.faults.ack.load(Ordering::SeqCst) {
            return Err(BrokerError::unavailable(
                "modify_ack_deadline",
                "simulated acknowledge failure",
            ));
        }
        let state = self
            .broker
            .subscription_state(&subscription.path(), subscription.name())?;
        {
            let now = Instant::now();
            let mut queue = state.queue.lock();
            for ack_id in ack_ids {
                if ack_deadline.is_zero() {
                    if let Some(outstanding) = queue.outstanding.remove(ack_id) {
                        queue.pending.push_front(outstanding.message);
                    }
                } else if let Some(outstanding) = queue.outstanding.get_mut(ack_id) {
                    outstanding.deadline = now + ack_deadline;
                }
            }
        }
        state.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
