use super::test_utilities::{TestClient, TestGateway};

#[tokio::test]
async fn test_health_check() {
    let gateway = TestGateway::start().await;
    let helper = TestClient::new(&gateway.base_url);

    let response = helper.health_check().await.unwrap();
    assert_eq!(response.status(), 200);

    let health_data: serde_json::Value = response.json().await.unwrap();
    assert_eq!(health_data["status"], "healthy");
    assert_eq!(health_data["service"], "relay");
    assert!(health_data["timestamp"].as_u64().is_some());
    assert_eq!(gateway.broker.publish_calls(), 0);
}
