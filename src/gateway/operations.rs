//! RPC operations — typed requests ⇄ gateway wire messages.
//!
//! Validation happens here, before any network traffic: variables are
//! already normalized by the codec, job keys must be numeric, names must be
//! non-empty.

use super::codec::{self, Variables};
use super::proto;
use super::retry::Idempotency;
use super::transport::{GatewayRequest, GatewayResponse};
use super::types::{
    BrokerSummary, CreateProcessInstance, JobAck, JobKey, JobOutcome, MessageAck, MessageRoute,
    ProcessInstanceMetadata, PublishMessage, Topology,
};
use crate::error::{ClientError, Result};

/// Wire value selecting the latest deployed process version.
pub const LATEST_VERSION: i32 = -1;

/// Retries left after FailJob. Zero hands the incident to an operator.
pub const FAIL_JOB_RETRIES: i32 = 0;

/// Retry class of a gateway RPC.
pub fn idempotency(request: &GatewayRequest) -> Idempotency {
    match request {
        GatewayRequest::CreateProcessInstance(_) => Idempotency::NonIdempotent,
        // The broker deduplicates on (name, correlation key, message id).
        GatewayRequest::PublishMessage(_) | GatewayRequest::Topology(_) => Idempotency::Idempotent,
        GatewayRequest::CompleteJob(_) | GatewayRequest::FailJob(_) => Idempotency::SingleTerminal,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub fn create_process_instance(request: &CreateProcessInstance) -> Result<GatewayRequest> {
    if request.bpmn_process_id.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "bpmn process id must not be empty".to_string(),
        ));
    }
    Ok(GatewayRequest::CreateProcessInstance(
        proto::CreateProcessInstanceRequest {
            process_definition_key: 0,
            bpmn_process_id: request.bpmn_process_id.clone(),
            version: request.version.unwrap_or(LATEST_VERSION),
            variables: codec::encode(&request.variables)?,
            tenant_id: String::new(),
        },
    ))
}

/// Build the publish request. Start messages carry their message id as the
/// correlation key so each one gets its own uniqueness scope.
pub fn publish_message(message: &PublishMessage) -> Result<GatewayRequest> {
    if message.name.trim().is_empty() {
        return Err(ClientError::InvalidArgument(
            "message name must not be empty".to_string(),
        ));
    }
    let correlation_key = match message.route() {
        MessageRoute::Correlated(key) => key,
        MessageRoute::Start => message.message_id.clone(),
    };
    let time_to_live = i64::try_from(message.time_to_live.as_millis()).map_err(|_| {
        ClientError::InvalidArgument(format!(
            "time to live {:?} does not fit the wire format",
            message.time_to_live
        ))
    })?;

    Ok(GatewayRequest::PublishMessage(proto::PublishMessageRequest {
        name: message.name.clone(),
        correlation_key,
        time_to_live,
        message_id: message.message_id.clone(),
        variables: codec::encode(&message.variables)?,
        tenant_id: String::new(),
    }))
}

pub fn complete_job(job_key: &JobKey, variables: &Variables) -> Result<GatewayRequest> {
    Ok(GatewayRequest::CompleteJob(proto::CompleteJobRequest {
        job_key: job_key.to_wire()?,
        variables: codec::encode(variables)?,
    }))
}

pub fn fail_job(job_key: &JobKey, reason: &str) -> Result<GatewayRequest> {
    Ok(GatewayRequest::FailJob(proto::FailJobRequest {
        job_key: job_key.to_wire()?,
        retries: FAIL_JOB_RETRIES,
        error_message: reason.to_string(),
        retry_back_off: 0,
        variables: String::new(),
    }))
}

pub fn resolve_job(job_key: &JobKey, outcome: &JobOutcome) -> Result<GatewayRequest> {
    match outcome {
        JobOutcome::Complete { variables } => complete_job(job_key, variables),
        JobOutcome::Fail { reason } => fail_job(job_key, reason),
    }
}

pub fn topology() -> GatewayRequest {
    GatewayRequest::Topology(proto::TopologyRequest {})
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn unexpected(expected: &str, got: &GatewayResponse) -> ClientError {
    ClientError::Rejected {
        code: "Internal".to_string(),
        message: format!("expected {} response, got {}", expected, got.rpc_name()),
    }
}

pub fn process_instance(response: GatewayResponse) -> Result<ProcessInstanceMetadata> {
    match response {
        GatewayResponse::CreateProcessInstance(r) => Ok(ProcessInstanceMetadata {
            process_definition_key: r.process_definition_key,
            bpmn_process_id: r.bpmn_process_id,
            version: r.version,
            process_instance_key: r.process_instance_key,
        }),
        other => Err(unexpected("CreateProcessInstance", &other)),
    }
}

pub fn message_ack(response: GatewayResponse, message: &PublishMessage) -> Result<MessageAck> {
    match response {
        GatewayResponse::PublishMessage(r) => Ok(MessageAck {
            key: r.key,
            message_id: message.message_id.clone(),
            route: message.route(),
        }),
        other => Err(unexpected("PublishMessage", &other)),
    }
}

pub fn job_ack(response: GatewayResponse, job_key: &JobKey, outcome: &JobOutcome) -> Result<JobAck> {
    match (&response, outcome) {
        (GatewayResponse::CompleteJob(_), JobOutcome::Complete { .. })
        | (GatewayResponse::FailJob(_), JobOutcome::Fail { .. }) => Ok(JobAck {
            job_key: job_key.clone(),
            outcome: outcome.label().to_string(),
            success: true,
        }),
        (other, JobOutcome::Complete { .. }) => Err(unexpected("CompleteJob", other)),
        (other, JobOutcome::Fail { .. }) => Err(unexpected("FailJob", other)),
    }
}

pub fn topology_summary(response: GatewayResponse) -> Result<Topology> {
    match response {
        GatewayResponse::Topology(r) => Ok(Topology {
            cluster_size: r.cluster_size,
            partitions_count: r.partitions_count,
            replication_factor: r.replication_factor,
            gateway_version: r.gateway_version,
            brokers: r
                .brokers
                .into_iter()
                .map(|b| BrokerSummary {
                    node_id: b.node_id,
                    address: format!("{}:{}", b.host, b.port),
                    version: b.version,
                    partitions: b.partitions.len(),
                })
                .collect(),
        }),
        other => Err(unexpected("Topology", &other)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
