use super::test_utilities::{
    ForwardingHandler, TestClient, TestRelay, memory_broker, recv_within, test_settings,
};
use relay::RelayError;
use std::time::Duration;

#[test_log::test(tokio::test)]
async fn test_published_message_is_delivered_and_acked() {
    let (handler, mut received) = ForwardingHandler::new();
    let relay = TestRelay::start(handler).await;
    let helper = TestClient::new(&relay.base_url);

    let response = helper.publish("hello").await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(
        response
            .text()
            .await
            .unwrap()
            .contains("Message published successfully:")
    );

    let payload = recv_within(&mut received, Duration::from_secs(5)).await;
    assert_eq!(payload.as_deref(), Some("hello"));

    relay.cancel.cancel();
    let stats = relay.handle.await.unwrap().unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(relay.broker.outstanding_count(&relay.subscription), 0);
}

#[tokio::test]
async fn test_rejected_payload_never_produces_a_delivery() {
    let (handler, mut received) = ForwardingHandler::new();
    let relay = TestRelay::start(handler).await;
    let helper = TestClient::new(&relay.base_url);

    let response = helper.publish_raw("{}").await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "Invalid request payload");

    assert!(recv_within(&mut received, Duration::from_millis(300)).await.is_none());
    assert_eq!(relay.broker.publish_calls(), 0);

    relay.cancel.cancel();
    let stats = relay.handle.await.unwrap().unwrap();
    assert_eq!(stats.received, 0);
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_consuming() {
    let (handler, mut received) = ForwardingHandler::new();
    let relay = TestRelay::start(handler).await;
    let helper = TestClient::new(&relay.base_url);

    relay.broker.set_publish_failure(true);
    let response = helper.publish("lost").await.unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "Failed to publish message");

    relay.broker.set_publish_failure(false);
    assert_eq!(helper.publish("kept").await.unwrap().status(), 200);
    let payload = recv_within(&mut received, Duration::from_secs(5)).await;
    assert_eq!(payload.as_deref(), Some("kept"));
    assert!(!relay.handle.is_finished());

    relay.cancel.cancel();
    assert!(relay.handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_pull_failure_stops_gateway_and_reports_error() {
    let (handler, _received) = ForwardingHandler::new();
    let broker = memory_broker();
    let relay = TestRelay::start_on(broker.clone(), handler, test_settings()).await;
    let base_url = relay.base_url.clone();

    broker.fail_next_pulls(10);
    let result = tokio::time::timeout(Duration::from_secs(5), relay.handle)
        .await
        .expect("relay did not stop")
        .unwrap();

    match result {
        Err(RelayError::Pull { subscription, .. }) => assert_eq!(subscription, "relay-sub"),
        other => panic!("expected pull error, got {other:?}"),
    }
    assert!(relay.cancel.is_cancelled());

    let late = reqwest::Client::new()
        .post(format!("{base_url}/publish"))
        .body(r#"{"data":"late"}"#)
        .send()
        .await;
    assert!(late.is_err());
}

#[tokio::test]
async fn test_shutdown_keeps_provisioned_resources() {
    let (handler, _received) = ForwardingHandler::new();
    let relay = TestRelay::start(handler).await;

    relay.cancel.cancel();
    assert!(relay.handle.await.unwrap().is_ok());

    // The broker itself outlives the session; its resources stay provisioned.
    assert_eq!(relay.broker.topic_count(), 1);
    assert_eq!(relay.broker.subscription_count(), 1);
}
