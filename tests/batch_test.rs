//! Batch execution against the in-process gateway.

mod helpers;

use zeebe_gateway_client::gateway::batch::{parse_operations, run_batch, ItemOutcome};
use zeebe_gateway_client::gateway::{BatchPolicy, CallOptions, OperationOutput, ZeebeClient};
use zeebe_gateway_client::ErrorKind;

use helpers::TestRig;

const OPS: &str = r#"[
    {"operation": "create_process_instance", "bpmnProcessId": "order-process", "variables": {"orderId": "A-1"}},
    {"operation": "create_process_instance", "bpmnProcessId": "not-deployed"},
    {"operation": "publish_message", "name": "orderPlaced", "correlationKey": "A-1", "messageId": "m-1"},
    {"operation": "resolve_job", "jobKey": "2251799813685400", "outcome": "complete", "variables": "{\"ok\": true}"}
]"#;

#[tokio::test]
async fn continue_on_error_runs_every_item() {
    let rig = TestRig::start().await;
    rig.gateway.deploy("order-process");
    rig.gateway.activate_job(2251799813685400);
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let report = run_batch(
        &client,
        parse_operations(OPS).unwrap(),
        BatchPolicy::ContinueOnError,
        CallOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.items.len(), 4);
    assert_eq!(report.success_count(), 3);
    match &report.items[1].outcome {
        ItemOutcome::Failed { error } => assert_eq!(error.kind, ErrorKind::NotFound),
        other => panic!("unexpected {:?}", other),
    }
    match &report.items[3].outcome {
        ItemOutcome::Succeeded {
            output: OperationOutput::Job(ack),
        } => assert_eq!(ack.outcome, "completed"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(rig.gateway.instances.lock().unwrap().len(), 1);
    assert_eq!(rig.gateway.completions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fail_fast_stops_after_first_failure() {
    let rig = TestRig::start().await;
    rig.gateway.deploy("order-process");
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let aborted = run_batch(
        &client,
        parse_operations(OPS).unwrap(),
        BatchPolicy::FailFast,
        CallOptions::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(aborted.index, 1);
    assert_eq!(aborted.completed.len(), 1);
    assert_eq!(aborted.error.kind(), ErrorKind::NotFound);
    // Nothing after the failing item was sent.
    assert!(rig.gateway.publishes.lock().unwrap().is_empty());
}
