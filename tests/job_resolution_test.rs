//! Complete / fail against the in-process gateway: exactly one terminal
//! outcome per job handle.

mod helpers;

use serde_json::json;
use zeebe_gateway_client::gateway::jobs::JobState;
use zeebe_gateway_client::gateway::{JobKey, Variables, ZeebeClient};
use zeebe_gateway_client::{ClientError, ErrorKind};

use helpers::TestRig;

const JOB: i64 = 2251799813685300;

#[tokio::test]
async fn complete_then_complete_again_is_stale() {
    let rig = TestRig::start().await;
    rig.gateway.activate_job(JOB);
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let vars = Variables::from_value(json!({"approved": true})).unwrap();
    let ack = client.complete_job(JOB, vars.clone()).await.unwrap();
    assert!(ack.success);
    assert_eq!(ack.job_key, JobKey::from(JOB));
    assert_eq!(client.job_state(&JobKey::from(JOB)), Some(JobState::Completed));

    let err = client.complete_job(JOB, vars).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleJobHandle);

    // The second call never reached the gateway.
    assert_eq!(rig.gateway.completions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn fail_job_sends_zero_retries() {
    let rig = TestRig::start().await;
    rig.gateway.activate_job(JOB);
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let ack = client.fail_job(JOB.to_string(), "payment declined").await.unwrap();
    assert_eq!(ack.outcome, "failed");

    let failures = rig.gateway.failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].retries, 0);
    assert_eq!(failures[0].retry_back_off, 0);
    assert_eq!(failures[0].error_message, "payment declined");

    let err = client
        .complete_job(JOB, Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::StaleJobHandle { .. }));
}

#[tokio::test]
async fn unknown_job_is_not_found_and_not_retried() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let err = client
        .complete_job(JOB + 1, Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));

    // The handle is released; once the job exists the call goes through.
    assert_eq!(client.job_state(&JobKey::from(JOB + 1)), None);
    rig.gateway.activate_job(JOB + 1);
    client.complete_job(JOB + 1, Variables::new()).await.unwrap();
}

#[tokio::test]
async fn non_numeric_job_key_fails_before_network() {
    let rig = TestRig::start().await;
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let err = client
        .complete_job("job-1", Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidArgument(_)));
    assert_eq!(rig.oauth.request_count(), 0);
    assert!(rig.gateway.seen_tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_resolutions_of_one_job_yield_one_success() {
    let rig = TestRig::start().await;
    rig.gateway.activate_job(JOB);
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    let a = {
        let client = client.clone();
        tokio::spawn(async move { client.complete_job(JOB, Variables::new()).await })
    };
    let b = {
        let client = client.clone();
        tokio::spawn(async move { client.fail_job(JOB, "racing").await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.kind() == ErrorKind::StaleJobHandle));
}

#[tokio::test]
async fn differently_spelled_key_of_resolved_job_is_stale() {
    let rig = TestRig::start().await;
    rig.gateway.activate_job(JOB);
    let client = ZeebeClient::connect(rig.config.clone()).unwrap();

    client
        .complete_job(JOB.to_string(), Variables::new())
        .await
        .unwrap();

    let plus = client
        .complete_job(format!("+{}", JOB), Variables::new())
        .await
        .unwrap_err();
    assert_eq!(plus.kind(), ErrorKind::StaleJobHandle);
    let padded = client
        .fail_job(format!(" {} ", JOB), "late failure")
        .await
        .unwrap_err();
    assert_eq!(padded.kind(), ErrorKind::StaleJobHandle);

    assert_eq!(rig.gateway.completions.lock().unwrap().len(), 1);
    assert!(rig.gateway.failures.lock().unwrap().is_empty());
    assert_eq!(rig.gateway.seen_tokens.lock().unwrap().len(), 1);
}
