//! RestClient against a small in-process fake of the Pub/Sub v1 REST API.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use super::test_utilities::{RecordingHandler, recv_within};
use relay::broker::{RestClient, RestConfig};
use relay::{
    BrokerBackend, BrokerClient, BrokerError, ConsumeLoop, ConsumerSettings, Connection,
    RelayError,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct FakeState {
    required_token: Option<String>,
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, (String, u64)>,
    queues: HashMap<String, VecDeque<(String, String)>>,
    acked: Vec<String>,
    next_id: u64,
}

type Shared = Arc<Mutex<FakeState>>;

/// Queue a delivery whose `data` is sent to the client verbatim.
fn enqueue_raw(state: &Shared, subscription: &str, id: &str, data: &str) {
    state
        .lock()
        .unwrap()
        .queues
        .entry(subscription.to_string())
        .or_default()
        .push_back((id.to_string(), data.to_string()));
}

fn error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

fn authorized(state: &FakeState, headers: &HeaderMap) -> bool {
    match &state.required_token {
        None => true,
        Some(token) => headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {token}")),
    }
}

async fn list_topics(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "missing credentials");
    }
    Json(json!({"topics": []})).into_response()
}

async fn get_topic(
    State(state): State<Shared>,
    Path((project, topic)): Path<(String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    if state.topics.contains_key(&topic) {
        Json(json!({"name": format!("projects/{project}/topics/{topic}")})).into_response()
    } else {
        error(StatusCode::NOT_FOUND, "Resource not found")
    }
}

async fn put_topic(
    State(state): State<Shared>,
    Path((project, topic)): Path<(String, String)>,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.topics.contains_key(&topic) {
        return error(StatusCode::CONFLICT, "Resource already exists");
    }
    state.topics.insert(topic.clone(), Vec::new());
    Json(json!({"name": format!("projects/{project}/topics/{topic}")})).into_response()
}

async fn publish(
    State(state): State<Shared>,
    Path((_project, action)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let Some(topic) = action.strip_suffix(":publish") else {
        return error(StatusCode::NOT_FOUND, "unknown action");
    };
    let mut state = state.lock().unwrap();
    let Some(subscriptions) = state.topics.get(topic).cloned() else {
        return error(StatusCode::NOT_FOUND, "Resource not found");
    };
    let data = body["messages"][0]["data"].as_str().unwrap_or_default().to_string();
    state.next_id += 1;
    let id = state.next_id.to_string();
    for subscription in subscriptions {
        state
            .queues
            .entry(subscription)
            .or_default()
            .push_back((id.clone(), data.clone()));
    }
    Json(json!({"messageIds": [id]})).into_response()
}

async fn get_subscription(
    State(state): State<Shared>,
    Path((project, subscription)): Path<(String, String)>,
) -> Response {
    let state = state.lock().unwrap();
    match state.subscriptions.get(&subscription) {
        Some((topic, deadline)) => Json(json!({
            "name": format!("projects/{project}/subscriptions/{subscription}"),
            "topic": format!("projects/{project}/topics/{topic}"),
            "ackDeadlineSeconds": deadline,
        }))
        .into_response(),
        None => error(StatusCode::NOT_FOUND, "Resource not found"),
    }
}

async fn put_subscription(
    State(state): State<Shared>,
    Path((project, subscription)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if state.subscriptions.contains_key(&subscription) {
        return error(StatusCode::CONFLICT, "Resource already exists");
    }
    let topic_path = body["topic"].as_str().unwrap_or_default().to_string();
    let topic = topic_path.rsplit('/').next().unwrap_or_default().to_string();
    let deadline = body["ackDeadlineSeconds"].as_u64().unwrap_or(10);
    match state.topics.get_mut(&topic) {
        Some(subscriptions) => subscriptions.push(subscription.clone()),
        None => return error(StatusCode::NOT_FOUND, "Topic not found"),
    }
    state
        .subscriptions
        .insert(subscription.clone(), (topic, deadline));
    Json(json!({
        "name": format!("projects/{project}/subscriptions/{subscription}"),
        "topic": topic_path,
        "ackDeadlineSeconds": deadline,
    }))
    .into_response()
}

async fn subscription_action(
    State(state): State<Shared>,
    Path((_project, action)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if let Some(subscription) = action.strip_suffix(":pull") {
        let max = body["maxMessages"].as_u64().unwrap_or(1) as usize;
        let queue = state.queues.entry(subscription.to_string()).or_default();
        let mut received = Vec::new();
        while received.len() < max {
            let Some((id, data)) = queue.pop_front() else {
                break;
            };
            received.push(json!({
                "ackId": format!("ack-{id}"),
                "message": {"data": data, "messageId": id, "publishTime": "2024-05-01T12:00:00Z"},
                "deliveryAttempt": 1,
            }));
        }
        return Json(json!({"receivedMessages": received})).into_response();
    }
    if action.ends_with(":acknowledge") {
        let ids: Vec<String> = body["ackIds"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        state.acked.extend(ids);
        return Json(json!({})).into_response();
    }
    if action.ends_with(":modifyAckDeadline") {
        return Json(json!({})).into_response();
    }
    error(StatusCode::NOT_FOUND, "unknown action")
}

async fn start_fake(required_token: Option<&str>) -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(FakeState {
        required_token: required_token.map(str::to_string),
        ..FakeState::default()
    }));
    let app = Router::new()
        .route("/v1/projects/{project}/topics", get(list_topics))
        .route(
            "/v1/projects/{project}/topics/{topic}",
            get(get_topic).put(put_topic).post(publish),
        )
        .route(
            "/v1/projects/{project}/subscriptions/{subscription}",
            get(get_subscription)
                .put(put_subscription)
                .post(subscription_action),
        )
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn config(endpoint: &str, token: Option<&str>) -> RestConfig {
    RestConfig {
        endpoint: endpoint.to_string(),
        access_token: token.map(str::to_string),
        request_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_rest_provision_publish_pull_ack() {
    let (endpoint, state) = start_fake(None).await;
    let client = RestClient::connect("proj", config(&endpoint, None))
        .await
        .unwrap();

    assert!(!client.topic_exists("orders").await.unwrap());
    let topic = client.create_topic("orders").await.unwrap();
    assert_eq!(topic.path(), "projects/proj/topics/orders");
    assert!(client.topic_exists("orders").await.unwrap());
    assert!(client.create_topic("orders").await.unwrap_err().is_already_exists());

    let subscription = client
        .create_subscription("orders-sub", &topic, Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(subscription.topic(), "orders");
    assert_eq!(subscription.ack_deadline(), Duration::from_secs(20));
    let loaded = client.get_subscription("orders-sub").await.unwrap();
    assert_eq!(loaded, subscription);

    let id = client.publish(&topic, b"hello".to_vec()).await.unwrap();
    assert_eq!(id.as_str(), "1");

    let received = client.pull(&subscription, 10).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].data, b"hello");
    assert_eq!(received[0].message_id, id);

    client
        .acknowledge(&subscription, &[received[0].ack_id.clone()])
        .await
        .unwrap();
    assert_eq!(state.lock().unwrap().acked, vec!["ack-1".to_string()]);
}

#[tokio::test]
async fn test_rest_missing_resources_map_to_not_found() {
    let (endpoint, _state) = start_fake(None).await;
    let client = RestClient::connect("proj", config(&endpoint, None))
        .await
        .unwrap();

    assert!(client.get_subscription("nope").await.unwrap_err().is_not_found());
    let ghost = relay::Topic::new("proj", "ghost");
    assert!(client.publish(&ghost, b"x".to_vec()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rest_bearer_token_is_required_by_server() {
    let (endpoint, _state) = start_fake(Some("secret")).await;

    let error = BrokerBackend::new_rest(config(&endpoint, None))
        .connect("proj")
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        RelayError::Connection {
            source: BrokerError::Unauthenticated { .. },
            ..
        }
    ));

    assert!(
        BrokerBackend::new_rest(config(&endpoint, Some("secret")))
            .connect("proj")
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_rest_client_rejects_calls_after_close() {
    let (endpoint, _state) = start_fake(None).await;
    let client = RestClient::connect("proj", config(&endpoint, None))
        .await
        .unwrap();
    client.close().await.unwrap();
    assert_eq!(
        client.topic_exists("orders").await.unwrap_err(),
        BrokerError::Closed
    );
}

#[test_log::test(tokio::test)]
async fn test_rest_pull_skips_undecodable_delivery() {
    let (endpoint, state) = start_fake(None).await;
    let client = RestClient::connect("proj", config(&endpoint, None))
        .await
        .unwrap();
    let topic = client.create_topic("orders").await.unwrap();
    let subscription = client
        .create_subscription("orders-sub", &topic, Duration::from_secs(10))
        .await
        .unwrap();

    enqueue_raw(&state, "orders-sub", "1", "!!!not-base64");
    enqueue_raw(&state, "orders-sub", "2", "aGVsbG8=");

    let received = client.pull(&subscription, 10).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id.as_str(), "2");
    assert_eq!(received[0].data, b"hello");
}

#[tokio::test]
async fn test_rest_consume_loop_survives_undecodable_delivery() {
    let (endpoint, state) = start_fake(None).await;
    let client = RestClient::connect("proj", config(&endpoint, None))
        .await
        .unwrap();
    let topic = client.create_topic("orders").await.unwrap();
    let subscription = client
        .create_subscription("orders-sub", &topic, Duration::from_secs(10))
        .await
        .unwrap();
    enqueue_raw(&state, "orders-sub", "1", "!!!not-base64");
    enqueue_raw(&state, "orders-sub", "2", "aGVsbG8=");

    let connection = Connection::new("proj", Arc::new(client));
    let (handler, mut seen) = RecordingHandler::new();
    let cancel = CancellationToken::new();
    let settings = ConsumerSettings {
        max_messages: 10,
        max_outstanding: 4,
        max_pull_failures: 1,
    };
    let running = tokio::spawn(
        ConsumeLoop::new(connection, subscription, settings).run(handler, cancel.clone()),
    );

    let delivered = recv_within(&mut seen, Duration::from_secs(5)).await.unwrap();
    assert_eq!(delivered.payload, "hello");

    cancel.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(state.lock().unwrap().acked, vec!["ack-2".to_string()]);
}
