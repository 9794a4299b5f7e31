//! Google Cloud Pub/Sub v1 REST client.
//!
//! Talks to `https://pubsub.googleapis.com` with a bearer token, or to a local
//! emulator (`PUBSUB_EMULATOR_HOST`) without authentication.

use super::{BrokerClient, MessageId, ReceivedMessage, Subscription, Topic};
use crate::error::{BrokerError, ResourceKind};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub endpoint: String,
    pub access_token: Option<String>,
    /// Upper bound for every request, including long-polling pulls.
    pub request_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RestConfig {
    /// Configuration for an emulator listening on `host:port`.
    pub fn emulator(host: &str) -> Self {
        let endpoint = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        Self {
            endpoint,
            ..Self::default()
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicResource {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSubscriptionBody {
    topic: String,
    ack_deadline_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionResource {
    name: String,
    topic: String,
    #[serde(default)]
    ack_deadline_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct PublishBody {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullBody {
    max_messages: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<WireReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReceivedMessage {
    ack_id: String,
    message: WireMessage,
    #[serde(default)]
    delivery_attempt: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    message_id: String,
    #[serde(default)]
    publish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody<'a> {
    ack_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineBody<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Last segment of a resource path such as `projects/p/topics/t`.
fn short_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    config: RestConfig,
    project: String,
    closed: AtomicBool,
}

impl RestClient {
    /// Build a client and probe the project so bad endpoints or credentials
    /// fail here rather than on first use.
    pub async fn connect(project: &str, config: RestConfig) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BrokerError::unavailable("client setup", e))?;
        let client = RestClient {
            http,
            config,
            project: project.to_string(),
            closed: AtomicBool::new(false),
        };

        let probe = format!("projects/{project}/topics?pageSize=1");
        client
            .send::<()>(Method::GET, &probe, None, "connect", None)
            .await?;
        debug!(endpoint = %client.config.endpoint, project, "Pub/Sub REST client connected");
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.config.endpoint.trim_end_matches('/'))
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        context: &str,
        resource: Option<(ResourceKind, &str)>,
    ) -> Result<String, BrokerError> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::unavailable(context, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BrokerError::unavailable(context, e))?;

        if status.is_success() {
            return Ok(text);
        }
        Err(status_to_error(status, &text, context, resource))
    }

    async fn send_json<B, R>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        context: &str,
        resource: Option<(ResourceKind, &str)>,
    ) -> Result<R, BrokerError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let text = self.send(method, path, body, context, resource).await?;
        serde_json::from_str(&text).map_err(|e| BrokerError::invalid_response(context, e))
    }
}

fn status_to_error(
    status: StatusCode,
    body: &str,
    context: &str,
    resource: Option<(ResourceKind, &str)>,
) -> BrokerError {
    let reason = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    match (status, resource) {
        (StatusCode::NOT_FOUND, Some((kind, name))) => BrokerError::NotFound {
            kind,
            name: name.to_string(),
        },
        (StatusCode::CONFLICT, Some((kind, name))) => BrokerError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => BrokerError::Unauthenticated {
            context: context.to_string(),
            reason,
        },
        (StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT, _) => {
            BrokerError::Unavailable {
                context: context.to_string(),
                reason,
            }
        }
        _ => BrokerError::Rejected {
            context: context.to_string(),
            status: status.as_u16(),
            reason,
        },
    }
}

#[async_trait]
impl BrokerClient for RestClient {
    async fn get_topic(&self, name: &str) -> Result<Topic, BrokerError> {
        self.ensure_open()?;
        let path = format!("projects/{}/topics/{name}", self.project);
        let resource: TopicResource = self
            .send_json::<(), _>(
                Method::GET,
                &path,
                None,
                "get topic",
                Some((ResourceKind::Topic, name)),
            )
            .await?;
        Ok(Topic::new(&self.project, short_name(&resource.name)))
    }

    async fn create_topic(&self, name: &str) -> Result<Topic, BrokerError> {
        self.ensure_open()?;
        let path = format!("projects/{}/topics/{name}", self.project);
        let resource: TopicResource = self
            .send_json(
                Method::PUT,
                &path,
                Some(&serde_json::json!({})),
                "create topic",
                Some((ResourceKind::Topic, name)),
            )
            .await?;
        Ok(Topic::new(&self.project, short_name(&resource.name)))
    }

    async fn get_subscription(&self, name: &str) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let path = format!("projects/{}/subscriptions/{name}", self.project);
        let resource: SubscriptionResource = self
            .send_json::<(), _>(
                Method::GET,
                &path,
                None,
                "get subscription",
                Some((ResourceKind::Subscription, name)),
            )
            .await?;
        Ok(Subscription::new(
            &self.project,
            short_name(&resource.name),
            short_name(&resource.topic),
            Duration::from_secs(resource.ack_deadline_seconds.unwrap_or(10)),
        ))
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &Topic,
        ack_deadline: Duration,
    ) -> Result<Subscription, BrokerError> {
        self.ensure_open()?;
        let path = format!("projects/{}/subscriptions/{name}", self.project);
        let body = CreateSubscriptionBody {
            topic: topic.path(),
            ack_deadline_seconds: ack_deadline.as_secs(),
        };
        let resource: SubscriptionResource = self
            .send_json(
                Method::PUT,
                &path,
                Some(&body),
                "create subscription",
                Some((ResourceKind::Subscription, name)),
            )
            .await?;
        Ok(Subscription::new(
            &self.project,
            short_name(&resource.name),
            short_name(&resource.topic),
            Duration::from_secs(
                resource
                    .ack_deadline_seconds
                    .unwrap_or(ack_deadline.as_secs()),
            ),
        ))
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<MessageId, BrokerError> {
        self.ensure_open()?;
        let body = PublishBody {
            messages: vec![OutgoingMessage {
                data: STANDARD.encode(payload),
            }],
        };
        let path = format!("{}:publish", topic.path());
        let response: PublishResponse = self
            .send_json(
                Method::POST,
                &path,
                Some(&body),
                "publish",
                Some((ResourceKind::Topic, topic.name())),
            )
            .await?;
        response
            .message_ids
            .into_iter()
            .next()
            .map(MessageId)
            .ok_or_else(|| BrokerError::invalid_response("publish", "no message id returned"))
    }

    async fn pull(
        &self,
        subscription: &Subscription,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        self.ensure_open()?;
        let path = format!("{}:pull", subscription.path());
        let response: PullResponse = self
            .send_json(
                Method::POST,
                &path,
                Some(&PullBody { max_messages }),
                "pull",
                Some((ResourceKind::Subscription, subscription.name())),
            )
            .await?;

        let mut messages = Vec::with_capacity(response.received_messages.len());
        for received in response.received_messages {
            let data = match STANDARD.decode(received.message.data.as_bytes()) {
                Ok(data) => data,
                Err(e) => {
                    // Left leased; the broker redelivers it once the ack deadline passes.
                    warn!(
                        subscription = %subscription,
                        message_id = %received.message.message_id,
                        "Skipping delivery with undecodable data: {e}"
                    );
                    continue;
                }
            };
            messages.push(ReceivedMessage {
                ack_id: received.ack_id,
                message_id: MessageId(received.message.message_id),
                data,
                publish_time: received.message.publish_time.unwrap_or_else(Utc::now),
                delivery_attempt: received.delivery_attempt.unwrap_or(1),
            });
        }
        Ok(messages)
    }

    async fn acknowledge(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if ack_ids.is_empty() {
            return Ok(());
        }
        let path = format!("{}:acknowledge", subscription.path());
        self.send(
            Method::POST,
            &path,
            Some(&AcknowledgeBody { ack_ids }),
            "acknowledge",
            Some((ResourceKind::Subscription, subscription.name())),
        )
        .await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &Subscription,
        ack_ids: &[String],
        ack_deadline: Duration,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if ack_ids.is_empty() {
            return Ok(());
        }
        let path = format!("{}:modifyAckDeadline", subscription.path());
        let body = ModifyAckDeadlineBody {
            ack_ids,
            ack_deadline_seconds: ack_deadline.as_secs(),
        };
        self.send(
            Method::POST,
            &path,
            Some(&body),
            "modify_ack_deadline",
            Some((ResourceKind::Subscription, subscription.name())),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
