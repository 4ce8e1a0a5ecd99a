//! Core types for the gateway client.
//!
//! Request types stay free of wire details. Conversions to and from the
//! generated proto messages live in [`super::operations`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::codec::Variables;
use super::retry::RetryMode;
use crate::error::{ClientError, Result};

/// Default region of a Camunda Cloud cluster.
pub const DEFAULT_REGION: &str = "bru-2";

/// Default time-to-live for published messages.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(3600);

// ─── Cluster Endpoint ────────────────────────────────────────────────────────

/// Where the gateway of one cluster lives. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    pub cluster_id: String,
    pub region: String,
    /// `host:port` or a full `http(s)://` URI.
    pub gateway_address: String,
}

impl ClusterEndpoint {
    /// Resolve the gateway address from the Camunda Cloud address template.
    pub fn from_cluster(cluster_id: impl Into<String>, region: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        let region = region.into();
        let gateway_address = format!("{}.{}.zeebe.camunda.io:443", cluster_id, region);
        Self {
            cluster_id,
            region,
            gateway_address,
        }
    }

    /// Use an explicit gateway address (self-managed gateways, tests).
    pub fn with_address(
        cluster_id: impl Into<String>,
        region: impl Into<String>,
        gateway_address: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            region: region.into(),
            gateway_address: gateway_address.into(),
        }
    }

    /// Full URI of the gateway. Bare `host:443` addresses use TLS.
    pub fn uri(&self) -> String {
        let addr = self.gateway_address.trim();
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else if addr.ends_with(":443") {
            format!("https://{}", addr)
        } else {
            format!("http://{}", addr)
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.uri().starts_with("https://")
    }
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// OAuth client credentials. Kept in memory only; neither `Debug` nor
/// `Serialize` emits the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Cache key for tokens, connections and shared clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub client_id: String,
    pub cluster_id: String,
}

impl SessionKey {
    pub fn new(credentials: &Credentials, endpoint: &ClusterEndpoint) -> Self {
        Self {
            client_id: credentials.client_id.clone(),
            cluster_id: endpoint.cluster_id.clone(),
        }
    }
}

// ─── Session Token ───────────────────────────────────────────────────────────

/// A bearer token and the instant it stops being valid.
#[derive(Clone)]
pub struct SessionToken {
    value: Arc<str>,
    expiry: Instant,
}

impl SessionToken {
    pub fn new(value: impl Into<Arc<str>>, expiry: Instant) -> Self {
        Self {
            value: value.into(),
            expiry,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    /// True when the token expires within `margin` of now.
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        match Instant::now().checked_add(margin) {
            Some(deadline) => deadline >= self.expiry,
            None => true,
        }
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value && self.expiry == other.expiry
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

// ─── Job Key ─────────────────────────────────────────────────────────────────

/// Opaque identifier of an activated job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The gateway addresses jobs by their decimal int64 key.
    pub fn to_wire(&self) -> Result<i64> {
        self.0.trim().parse::<i64>().map_err(|_| {
            ClientError::InvalidArgument(format!("job key '{}' is not a numeric Zeebe key", self.0))
        })
    }
}

impl From<&str> for JobKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<i64> for JobKey {
    fn from(key: i64) -> Self {
        Self(key.to_string())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Process Instance ────────────────────────────────────────────────────────

/// Request to start a new instance of a deployed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProcessInstance {
    pub bpmn_process_id: String,
    /// `None` selects the latest deployed version.
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub variables: Variables,
}

impl CreateProcessInstance {
    pub fn new(bpmn_process_id: impl Into<String>, variables: Variables) -> Self {
        Self {
            bpmn_process_id: bpmn_process_id.into(),
            version: None,
            variables,
        }
    }
}

/// Metadata of a started process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstanceMetadata {
    pub process_definition_key: i64,
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_instance_key: i64,
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Which publish path a message takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "route", content = "correlation_key")]
pub enum MessageRoute {
    /// Correlated to waiting process instances by key.
    Correlated(String),
    /// Broadcast to process start events matching the name.
    Start,
}

impl MessageRoute {
    /// An absent or empty correlation key routes to the start-message path.
    pub fn from_key(correlation_key: Option<&str>) -> Self {
        match correlation_key {
            Some(key) if !key.is_empty() => Self::Correlated(key.to_string()),
            _ => Self::Start,
        }
    }
}

/// A message to publish. `message_id` is the idempotency token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessage {
    pub name: String,
    #[serde(default)]
    pub correlation_key: Option<String>,
    #[serde(default = "fresh_message_id")]
    pub message_id: String,
    #[serde(default = "default_ttl", with = "ttl_seconds")]
    pub time_to_live: Duration,
    #[serde(default)]
    pub variables: Variables,
}

impl PublishMessage {
    /// A start message with a freshly generated message id and the default TTL.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            correlation_key: None,
            message_id: fresh_message_id(),
            time_to_live: DEFAULT_MESSAGE_TTL,
            variables: Variables::new(),
        }
    }

    pub fn correlation_key(mut self, key: impl Into<String>) -> Self {
        self.correlation_key = Some(key.into());
        self
    }

    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn route(&self) -> MessageRoute {
        MessageRoute::from_key(self.correlation_key.as_deref())
    }
}

fn fresh_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_ttl() -> Duration {
    DEFAULT_MESSAGE_TTL
}

mod ttl_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Server acknowledgement of a published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub key: i64,
    pub message_id: String,
    pub route: MessageRoute,
}

// ─── Jobs ────────────────────────────────────────────────────────────────────

/// The single terminal outcome a job handle is resolved with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum JobOutcome {
    Complete {
        #[serde(default)]
        variables: Variables,
    },
    Fail {
        reason: String,
    },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "completed",
            Self::Fail { .. } => "failed",
        }
    }
}

/// A previously activated job plus the outcome to report for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub job_key: JobKey,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

/// Acknowledgement that the gateway accepted a job outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAck {
    pub job_key: JobKey,
    pub outcome: String,
    pub success: bool,
}

// ─── Topology ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub cluster_size: i32,
    pub partitions_count: i32,
    pub replication_factor: i32,
    pub gateway_version: String,
    pub brokers: Vec<BrokerSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSummary {
    pub node_id: i32,
    pub address: String,
    pub version: String,
    pub partitions: usize,
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// One remote operation. Dispatched by exhaustive match in
/// [`super::client::ZeebeClient::execute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "operation")]
pub enum Operation {
    CreateProcessInstance(CreateProcessInstance),
    PublishMessage(PublishMessage),
    ResolveJob(JobHandle),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateProcessInstance(_) => "create_process_instance",
            Self::PublishMessage(m) => match m.route() {
                MessageRoute::Start => "publish_start_message",
                MessageRoute::Correlated(_) => "publish_message",
            },
            Self::ResolveJob(h) => match h.outcome {
                JobOutcome::Complete { .. } => "complete_job",
                JobOutcome::Fail { .. } => "fail_job",
            },
        }
    }
}

/// Success payload of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationOutput {
    ProcessInstance(ProcessInstanceMetadata),
    Message(MessageAck),
    Job(JobAck),
}

// ─── Call Options ────────────────────────────────────────────────────────────

/// Per-call knobs. The default uses the client's configured timeout, no
/// cancellation and the operation's own retry policy.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub retry: RetryMode,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_retry(mut self, retry: RetryMode) -> Self {
        self.retry = retry;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
