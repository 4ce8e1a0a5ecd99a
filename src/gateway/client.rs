//! ZeebeClient — the session object callers hold.
//!
//! One client owns one token cache, one gateway channel and one job handle
//! registry for a `(client_id, cluster_id)` pair. It is cheap to clone and
//! safe to share across tasks.
//!
//! Every call runs the same pipeline: acquire token → send RPC → classify
//! failure → maybe back off and retry. The first `UNAUTHENTICATED` answer in
//! a call invalidates the token and is retried as a non-delivered failure; a
//! second one is terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::codec::Variables;
use super::config::ClientConfig;
use super::jobs::{JobHandleRegistry, JobState};
use super::operations;
use super::registry::ClientRegistry;
use super::retry::RetryCoordinator;
use super::session::{OAuthTokenExchange, SessionManager, TokenExchange};
use super::transport::{GatewayRequest, GatewayResponse, GatewayTransport, GrpcTransport};
use super::types::{
    CallOptions, ClusterEndpoint, CreateProcessInstance, Credentials, JobAck, JobHandle, JobKey,
    JobOutcome, MessageAck, MessageRoute, Operation, OperationOutput, ProcessInstanceMetadata,
    PublishMessage, SessionKey, Topology,
};
use crate::error::{ClientError, Result};

struct ClientInner {
    config: ClientConfig,
    endpoint: ClusterEndpoint,
    session: SessionManager,
    transport: Arc<dyn GatewayTransport>,
    retry: RetryCoordinator,
    jobs: JobHandleRegistry,
    closed: AtomicBool,
}

/// Client for one Camunda Cloud / Zeebe cluster gateway.
#[derive(Clone)]
pub struct ZeebeClient {
    inner: Arc<ClientInner>,
}

impl ZeebeClient {
    /// Build a client from config. The gateway connection and the first
    /// token exchange both happen lazily on the first call.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let exchange = OAuthTokenExchange::new(
            config.authorization_server_url.clone(),
            config.token_audience.clone(),
            config.request_timeout,
        )?;
        let transport = GrpcTransport::new(&config.endpoint(), config.connect_timeout)?;
        tracing::info!(
            client_id = %config.credentials.client_id,
            address = %transport.address(),
            "zeebe client created"
        );
        Ok(Self::from_parts(config, Arc::new(exchange), Arc::new(transport)))
    }

    /// Assemble a client from explicit parts.
    pub fn from_parts(
        config: ClientConfig,
        exchange: Arc<dyn TokenExchange>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        let endpoint = config.endpoint();
        let session = SessionManager::new(exchange, config.refresh_margin);
        let retry = RetryCoordinator::new(config.retry);
        Self {
            inner: Arc::new(ClientInner {
                config,
                endpoint,
                session,
                transport,
                retry,
                jobs: JobHandleRegistry::default(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> &ClusterEndpoint {
        &self.inner.endpoint
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.credentials(), &self.inner.endpoint)
    }

    fn credentials(&self) -> &Credentials {
        &self.inner.config.credentials
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Local terminal state of a job key, if this client resolved it.
    pub fn job_state(&self, job_key: &JobKey) -> Option<JobState> {
        self.inner.jobs.state(job_key)
    }

    pub(crate) fn same_client(&self, other: &ZeebeClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -----------------------------------------------------------------------
    // Call pipeline
    // -----------------------------------------------------------------------

    async fn call(
        &self,
        operation: &'static str,
        options: &CallOptions,
        request: GatewayRequest,
    ) -> Result<GatewayResponse> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let idempotency = operations::idempotency(&request);

        let timeout = options.timeout.unwrap_or(self.inner.config.request_timeout);
        let token_rejected = AtomicBool::new(false);

        let attempts = self
            .inner
            .retry
            .run(operation, idempotency, options.retry, |attempt| {
                let request = request.clone();
                let token_rejected = &token_rejected;
                let attempt_body = async move {
                    if self.is_closed() {
                        return Err(ClientError::Closed);
                    }
                    let token = self
                        .inner
                        .session
                        .acquire_token(self.credentials(), &self.inner.endpoint)
                        .await?;
                    tracing::debug!(operation, attempt, rpc = request.rpc_name(), "sending");

                    match self.inner.transport.send(request, &token, timeout).await {
                        Err(ClientError::Auth(message))
                            if !token_rejected.swap(true, Ordering::SeqCst) =>
                        {
                            self.inner
                                .session
                                .invalidate(self.credentials(), &self.inner.endpoint, &token)
                                .await;
                            Err(ClientError::TransientAuth(format!(
                                "gateway rejected token: {}",
                                message
                            )))
                        }
                        other => other,
                    }
                };
                // The deadline covers token acquisition and connecting too.
                async move {
                    match tokio::time::timeout(timeout, attempt_body).await {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::Timeout {
                            timeout_ms: timeout.as_millis() as u64,
                        }),
                    }
                }
            });

        match &options.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(operation, "call cancelled");
                        Err(ClientError::Cancelled)
                    }
                    result = attempts => result,
                }
            }
            None => attempts.await,
        }
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Start a new instance of the latest version of `process_id`.
    pub async fn create_process_instance(
        &self,
        process_id: &str,
        variables: Variables,
    ) -> Result<ProcessInstanceMetadata> {
        self.create_process_instance_with(
            CreateProcessInstance::new(process_id, variables),
            CallOptions::default(),
        )
        .await
    }

    pub async fn create_process_instance_with(
        &self,
        request: CreateProcessInstance,
        options: CallOptions,
    ) -> Result<ProcessInstanceMetadata> {
        let wire = operations::create_process_instance(&request)?;
        let response = self
            .call("create_process_instance", &options, wire)
            .await?;
        let instance = operations::process_instance(response)?;
        tracing::info!(
            bpmn_process_id = %instance.bpmn_process_id,
            process_instance_key = instance.process_instance_key,
            version = instance.version,
            "process instance created"
        );
        Ok(instance)
    }

    /// Publish a message. An empty or absent correlation key publishes a
    /// start message.
    pub async fn publish_message(&self, message: PublishMessage) -> Result<MessageAck> {
        self.publish_message_with(message, CallOptions::default())
            .await
    }

    pub async fn publish_message_with(
        &self,
        message: PublishMessage,
        options: CallOptions,
    ) -> Result<MessageAck> {
        let wire = operations::publish_message(&message)?;
        let operation = match message.route() {
            MessageRoute::Start => "publish_start_message",
            MessageRoute::Correlated(_) => "publish_message",
        };
        let response = self
            .call(operation, &options, wire)
            .await?;
        let ack = operations::message_ack(response, &message)?;
        tracing::info!(
            operation,
            message_name = %message.name,
            message_id = %message.message_id,
            key = ack.key,
            "message published"
        );
        Ok(ack)
    }

    pub async fn complete_job(
        &self,
        job_key: impl Into<JobKey>,
        variables: Variables,
    ) -> Result<JobAck> {
        self.resolve_job(
            JobHandle {
                job_key: job_key.into(),
                outcome: JobOutcome::Complete { variables },
            },
            CallOptions::default(),
        )
        .await
    }

    /// Fail a job with zero retries left.
    pub async fn fail_job(&self, job_key: impl Into<JobKey>, reason: &str) -> Result<JobAck> {
        self.resolve_job(
            JobHandle {
                job_key: job_key.into(),
                outcome: JobOutcome::Fail {
                    reason: reason.to_string(),
                },
            },
            CallOptions::default(),
        )
        .await
    }

    /// Report the single terminal outcome of a job.
    pub async fn resolve_job(&self, handle: JobHandle, options: CallOptions) -> Result<JobAck> {
        let JobHandle { job_key, outcome } = handle;
        let wire = operations::resolve_job(&job_key, &outcome)?;
        let reservation = self.inner.jobs.reserve(&job_key)?;

        let operation = match outcome {
            JobOutcome::Complete { .. } => "complete_job",
            JobOutcome::Fail { .. } => "fail_job",
        };
        let response = self
            .call(operation, &options, wire)
            .await?;
        let ack = operations::job_ack(response, &job_key, &outcome)?;
        reservation.commit(&outcome);

        tracing::info!(operation, job_key = %job_key, "job resolved");
        Ok(ack)
    }

    /// Run one tagged operation.
    pub async fn execute(
        &self,
        operation: Operation,
        options: CallOptions,
    ) -> Result<OperationOutput> {
        match operation {
            Operation::CreateProcessInstance(request) => self
                .create_process_instance_with(request, options)
                .await
                .map(OperationOutput::ProcessInstance),
            Operation::PublishMessage(message) => self
                .publish_message_with(message, options)
                .await
                .map(OperationOutput::Message),
            Operation::ResolveJob(handle) => self
                .resolve_job(handle, options)
                .await
                .map(OperationOutput::Job),
        }
    }

    /// Cluster topology; doubles as a health check.
    pub async fn topology(&self) -> Result<Topology> {
        let response = self
            .call("topology", &CallOptions::default(), operations::topology())
            .await?;
        operations::topology_summary(response)
    }

    /// Release the connection and cached tokens. Later calls fail with
    /// `Closed`. Closing twice is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.transport.close().await;
        self.inner.session.clear().await;
        ClientRegistry::global().forget(self);
        tracing::info!(
            client_id = %self.credentials().client_id,
            cluster_id = %self.inner.endpoint.cluster_id,
            "zeebe client closed"
        );
    }
}

impl std::fmt::Debug for ZeebeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeebeClient")
            .field("endpoint", &self.inner.endpoint)
            .field("client_id", &self.inner.config.credentials.client_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
