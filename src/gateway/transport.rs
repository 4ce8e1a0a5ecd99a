//! Transport layer — one multiplexed gRPC channel per cluster gateway.
//!
//! The channel is opened lazily on first use and shared by every concurrent
//! call (HTTP/2 streams, no head-of-line blocking). When a call detects a
//! broken connection the channel is dropped and the next call reconnects.
//! The generation counter makes concurrent failures on the same channel
//! trigger exactly one reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use super::proto;
use super::proto::gateway_client::GatewayClient;
use super::types::{ClusterEndpoint, SessionToken};
use crate::error::{ClientError, ConfigError, Delivery, Result};

const HTTP2_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(20);
const TCP_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Prefix tonic's generated client puts on readiness failures. The request
/// was never written when this shows up.
const NOT_READY_PREFIX: &str = "Service was not ready";

// ---------------------------------------------------------------------------
// Request / response envelopes
// ---------------------------------------------------------------------------

/// One gateway RPC with its wire payload.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    CreateProcessInstance(proto::CreateProcessInstanceRequest),
    PublishMessage(proto::PublishMessageRequest),
    CompleteJob(proto::CompleteJobRequest),
    FailJob(proto::FailJobRequest),
    Topology(proto::TopologyRequest),
}

impl GatewayRequest {
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Self::CreateProcessInstance(_) => "CreateProcessInstance",
            Self::PublishMessage(_) => "PublishMessage",
            Self::CompleteJob(_) => "CompleteJob",
            Self::FailJob(_) => "FailJob",
            Self::Topology(_) => "Topology",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    CreateProcessInstance(proto::CreateProcessInstanceResponse),
    PublishMessage(proto::PublishMessageResponse),
    CompleteJob(proto::CompleteJobResponse),
    FailJob(proto::FailJobResponse),
    Topology(proto::TopologyResponse),
}

impl GatewayResponse {
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Self::CreateProcessInstance(_) => "CreateProcessInstance",
            Self::PublishMessage(_) => "PublishMessage",
            Self::CompleteJob(_) => "CompleteJob",
            Self::FailJob(_) => "FailJob",
            Self::Topology(_) => "Topology",
        }
    }
}

// ---------------------------------------------------------------------------
// GatewayTransport
// ---------------------------------------------------------------------------

/// Sends authenticated RPCs to one cluster gateway.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send(
        &self,
        request: GatewayRequest,
        token: &SessionToken,
        timeout: Duration,
    ) -> Result<GatewayResponse>;

    /// Release the connection. Later `send` calls fail with `Closed`.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

// ---------------------------------------------------------------------------
// GrpcTransport
// ---------------------------------------------------------------------------

type SharedConnect = Shared<BoxFuture<'static, Result<Channel>>>;

struct ChannelState {
    channel: Option<Channel>,
    /// Connect attempt in progress, tagged with the generation it will install.
    connecting: Option<(u64, SharedConnect)>,
    generation: u64,
}

/// tonic implementation of [`GatewayTransport`].
pub struct GrpcTransport {
    endpoint: Endpoint,
    address: String,
    state: Mutex<ChannelState>,
    closed: AtomicBool,
}

impl GrpcTransport {
    /// Build the endpoint. No connection is made until the first call.
    pub fn new(cluster: &ClusterEndpoint, connect_timeout: Duration) -> Result<Self> {
        let address = cluster.uri();
        let invalid = |reason: String| {
            ClientError::Config(ConfigError::Invalid {
                name: "ZEEBE_ADDRESS",
                reason,
            })
        };

        let mut endpoint = Endpoint::from_shared(address.clone())
            .map_err(|e| invalid(format!("'{}': {}", address, e)))?
            .connect_timeout(connect_timeout)
            .http2_keep_alive_interval(HTTP2_KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(KEEP_ALIVE_TIMEOUT)
            .keep_alive_while_idle(true)
            .tcp_keepalive(Some(TCP_KEEP_ALIVE))
            .tcp_nodelay(true);

        if cluster.uses_tls() {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| invalid(format!("tls: {}", e)))?;
        }

        Ok(Self {
            endpoint,
            address,
            state: Mutex::new(ChannelState {
                channel: None,
                connecting: None,
                generation: 0,
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current channel, connecting if there is none.
    ///
    /// The state lock is never held across the connect itself. Concurrent
    /// callers join the one attempt in progress and share its outcome.
    async fn channel(&self) -> Result<(u64, Channel)> {
        let (generation, pending) = {
            let mut state = self.state.lock().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::Closed);
            }
            if let Some(channel) = &state.channel {
                return Ok((state.generation, channel.clone()));
            }
            match &state.connecting {
                Some((generation, pending)) => (*generation, pending.clone()),
                None => {
                    let generation = state.generation + 1;
                    let endpoint = self.endpoint.clone();
                    let address = self.address.clone();
                    tracing::debug!(address = %address, "connecting to gateway");
                    let pending = async move {
                        endpoint.connect().await.map_err(|e| {
                            tracing::warn!(address = %address, error = %e, "gateway connect failed");
                            ClientError::transport(
                                format!("connect to {} failed: {}", address, e),
                                Delivery::NotSent,
                            )
                        })
                    }
                    .boxed()
                    .shared();
                    state.connecting = Some((generation, pending.clone()));
                    (generation, pending)
                }
            }
        };

        let result = pending.await;

        let mut state = self.state.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if matches!(&state.connecting, Some((g, _)) if *g == generation) {
            state.connecting = None;
            if let Ok(channel) = &result {
                state.generation = generation;
                state.channel = Some(channel.clone());
                tracing::info!(
                    address = %self.address,
                    generation,
                    "gateway channel established"
                );
            }
        }
        result.map(|channel| (generation, channel))
    }

    /// Generation of the current channel; bumps on every reconnect.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Drop the channel if it is still the one that failed.
    async fn reset(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation && state.channel.take().is_some() {
            tracing::info!(
                address = %self.address,
                generation,
                "gateway channel dropped, reconnecting on next call"
            );
        }
    }

    async fn dispatch(
        channel: Channel,
        request: GatewayRequest,
        token: &SessionToken,
        timeout: Duration,
    ) -> std::result::Result<GatewayResponse, tonic::Status> {
        let mut client = GatewayClient::new(channel);
        match request {
            GatewayRequest::CreateProcessInstance(r) => client
                .create_process_instance(authorized(r, token, timeout)?)
                .await
                .map(|r| GatewayResponse::CreateProcessInstance(r.into_inner())),
            GatewayRequest::PublishMessage(r) => client
                .publish_message(authorized(r, token, timeout)?)
                .await
                .map(|r| GatewayResponse::PublishMessage(r.into_inner())),
            GatewayRequest::CompleteJob(r) => client
                .complete_job(authorized(r, token, timeout)?)
                .await
                .map(|r| GatewayResponse::CompleteJob(r.into_inner())),
            GatewayRequest::FailJob(r) => client
                .fail_job(authorized(r, token, timeout)?)
                .await
                .map(|r| GatewayResponse::FailJob(r.into_inner())),
            GatewayRequest::Topology(r) => client
                .topology(authorized(r, token, timeout)?)
                .await
                .map(|r| GatewayResponse::Topology(r.into_inner())),
        }
    }
}

/// Wrap a message with bearer metadata and a gRPC deadline.
fn authorized<T>(
    message: T,
    token: &SessionToken,
    timeout: Duration,
) -> std::result::Result<tonic::Request<T>, tonic::Status> {
    let mut request = tonic::Request::new(message);
    let value: MetadataValue<_> = token
        .bearer()
        .parse()
        .map_err(|_| tonic::Status::unauthenticated("token is not a valid header value"))?;
    request.metadata_mut().insert("authorization", value);
    request.set_timeout(timeout);
    Ok(request)
}

/// Map a status from the generated client, telling readiness failures (the
/// request never left) apart from failures after the request was written.
fn classify_status(status: &tonic::Status) -> ClientError {
    if status.code() == tonic::Code::Unknown && status.message().starts_with(NOT_READY_PREFIX) {
        return ClientError::transport(status.message(), Delivery::NotSent);
    }
    if status.code() == tonic::Code::Unknown && is_transport_source(status) {
        return ClientError::transport(status.message(), Delivery::Unknown);
    }
    ClientError::from_status(status)
}

fn is_transport_source(status: &tonic::Status) -> bool {
    use std::error::Error;
    status
        .source()
        .map(|s| s.is::<tonic::transport::Error>() || s.is::<std::io::Error>())
        .unwrap_or(false)
}

#[async_trait]
impl GatewayTransport for GrpcTransport {
    async fn send(
        &self,
        request: GatewayRequest,
        token: &SessionToken,
        timeout: Duration,
    ) -> Result<GatewayResponse> {
        let rpc = request.rpc_name();
        let (generation, channel) = self.channel().await?;

        let outcome =
            tokio::time::timeout(timeout, Self::dispatch(channel, request, token, timeout)).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => {
                let error = classify_status(&status);
                if matches!(error, ClientError::Transport { .. }) {
                    self.reset(generation).await;
                }
                tracing::debug!(rpc, code = ?status.code(), error = %error, "gateway rpc failed");
                Err(error)
            }
            Err(_) => Err(ClientError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        state.connecting = None;
        if state.channel.take().is_some() {
            tracing::info!(address = %self.address, "gateway channel closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
