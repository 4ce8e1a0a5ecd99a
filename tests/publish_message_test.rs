//! Publishing against the in-process gateway: acknowledgement, dedupe by
//! message id, start-message routing, token reuse.

mod helpers;

use std::time::Duration;

use serde_json::json;
use zeebe_gateway_client::gateway::{MessageRoute, PublishMessage, Variables, ZeebeClient};
use zeebe_gateway_client::ClientError;

use helpers::TestRig;

fn qty(n: i64) -> Variables {
    Variables::from_value(json!({ "qty": n })).unwrap()
}

#[tokio::test]
async fn publish_is_acknowledged_with_key() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let ack = client
        .publish_message(
            PublishMessage::new("orderPlaced")
                .correlation_key("order-42")
                .time_to_live(Duration::from_secs(3600))
                .variables(qty(3)),
        )
        .await
        .unwrap();

    assert!(ack.key > 0);
    assert_eq!(ack.route, MessageRoute::Correlated("order-42".into()));

    let publishes = rig.gateway.publishes.lock().unwrap().clone();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].name, "orderPlaced");
    assert_eq!(publishes[0].correlation_key, "order-42");
    assert_eq!(publishes[0].time_to_live, 3_600_000);
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&publishes[0].variables).unwrap(),
        json!({"qty": 3})
    );
}

#[tokio::test]
async fn republish_with_same_message_id_returns_same_key() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let message = PublishMessage::new("orderPlaced")
        .correlation_key("order-42")
        .message_id("msg-0001")
        .variables(qty(3));

    let first = client.publish_message(message.clone()).await.unwrap();
    let second = client.publish_message(message).await.unwrap();
    assert_eq!(first.key, second.key);

    // A fresh message id is a different message.
    let third = client
        .publish_message(PublishMessage::new("orderPlaced").correlation_key("order-42"))
        .await
        .unwrap();
    assert_ne!(first.key, third.key);
}

#[tokio::test]
async fn empty_correlation_key_publishes_start_message() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let absent = client
        .publish_message(PublishMessage::new("newOrder").message_id("start-1"))
        .await
        .unwrap();
    let empty = client
        .publish_message(
            PublishMessage::new("newOrder")
                .correlation_key("")
                .message_id("start-2"),
        )
        .await
        .unwrap();

    assert_eq!(absent.route, MessageRoute::Start);
    assert_eq!(empty.route, MessageRoute::Start);
    assert_ne!(absent.key, empty.key);

    let publishes = rig.gateway.publishes.lock().unwrap().clone();
    assert_eq!(publishes[0].correlation_key, "start-1");
    assert_eq!(publishes[1].correlation_key, "start-2");
}

#[tokio::test]
async fn text_variables_are_parsed_before_sending() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let err = Variables::parse("{\"qty\": ").unwrap_err();
    assert!(matches!(err, ClientError::InvalidPayload(_)));

    let vars = Variables::parse(r#"{"qty": 3, "sku": "A-1"}"#).unwrap();
    client
        .publish_message(PublishMessage::new("orderPlaced").variables(vars))
        .await
        .unwrap();
    assert_eq!(rig.gateway.publishes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn token_is_reused_across_calls() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    for n in 0..5 {
        client
            .publish_message(
                PublishMessage::new("tick").correlation_key(format!("k-{}", n)),
            )
            .await
            .unwrap();
    }

    assert_eq!(rig.oauth.request_count(), 1);
    let tokens = rig.gateway.seen_tokens.lock().unwrap().clone();
    assert!(tokens.iter().all(|t| t == "token-1"));
    assert_eq!(
        rig.oauth.audiences.lock().unwrap().clone(),
        vec!["zeebe.camunda.io".to_string()]
    );
}

#[tokio::test]
async fn concurrent_publishes_share_one_token_exchange() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let mut handles = Vec::new();
    for n in 0..10 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .publish_message(
                    PublishMessage::new("burst").correlation_key(format!("b-{}", n)),
                )
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(rig.oauth.request_count(), 1);
    assert_eq!(rig.gateway.publishes.lock().unwrap().len(), 10);
}
