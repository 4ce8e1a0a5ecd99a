//! Zeebe gateway integration — session, transport, retry and operations.
//!
//! ## Architecture
//!
//! ```text
//! Operation ──► ZeebeClient ──► SessionManager (OAuth token, single-flight)
//!                   │
//!                   ├──► RetryCoordinator (backoff, idempotency classes)
//!                   │
//!                   └──► GatewayTransport (one tonic Channel, bearer metadata)
//!                              │
//!                              └──► Zeebe gateway (gRPC)
//! ```
//!
//! Variables cross the boundary through [`codec`]; job keys are tracked by
//! [`jobs`] so each handle reaches exactly one terminal outcome.

pub mod batch;
pub mod client;
pub mod codec;
pub mod config;
pub mod jobs;
pub mod operations;
pub mod proto;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

pub use batch::{run_batch, BatchAborted, BatchItem, BatchPolicy, BatchReport, ItemOutcome};
pub use client::ZeebeClient;
pub use codec::{Variables, VariablesInput};
pub use config::ClientConfig;
pub use registry::ClientRegistry;
pub use retry::{Idempotency, RetryMode, RetryPolicy};
pub use session::{OAuthTokenExchange, SessionManager, TokenExchange};
pub use transport::{GatewayRequest, GatewayResponse, GatewayTransport, GrpcTransport};
pub use types::{
    CallOptions, ClusterEndpoint, CreateProcessInstance, Credentials, JobAck, JobHandle, JobKey,
    JobOutcome, MessageAck, MessageRoute, Operation, OperationOutput, ProcessInstanceMetadata,
    PublishMessage, SessionToken, Topology,
};
