//! Error types for the gateway client.
//!
//! Every failure surfaced to a caller is a [`ClientError`]. Each variant maps
//! to one [`ErrorKind`] tag, and the retry coordinator only looks at
//! [`ClientError::is_retryable`] and [`ClientError::delivery`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Whether a failed request could have reached the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// The request provably never reached the gateway (connect failure,
    /// token failure, back-pressure rejection).
    NotSent,
    /// The request may have been processed.
    Unknown,
}

/// Main error type for gateway operations.
///
/// `Clone` so a single in-flight token exchange can hand the same outcome to
/// every waiter.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("token exchange failed: {0}")]
    TransientAuth(String),

    #[error("transport error: {message}")]
    Transport { message: String, delivery: Delivery },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("invalid variables payload: {0}")]
    InvalidPayload(String),

    #[error("job {job_key} already reached a terminal outcome ({state})")]
    StaleJobHandle { job_key: String, state: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("gateway is under back-pressure: {0}")]
    ResourceExhausted(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("client is closed")]
    Closed,

    #[error("request cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Stable tag for a [`ClientError`], used in structured batch records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    TransientAuth,
    Transport,
    Timeout,
    InvalidPayload,
    StaleJobHandle,
    NotFound,
    InvalidArgument,
    ResourceExhausted,
    Rejected,
    Closed,
    Cancelled,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::TransientAuth => "transient_auth",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::InvalidPayload => "invalid_payload",
            Self::StaleJobHandle => "stale_job_handle",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::TransientAuth(_) => ErrorKind::TransientAuth,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::InvalidPayload(_) => ErrorKind::InvalidPayload,
            Self::StaleJobHandle { .. } => ErrorKind::StaleJobHandle,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Closed => ErrorKind::Closed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Transient classes the retry coordinator may absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientAuth(_)
                | Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::ResourceExhausted(_)
        )
    }

    /// Whether the gateway may have seen the request.
    pub fn delivery(&self) -> Delivery {
        match self {
            Self::Transport { delivery, .. } => *delivery,
            // Token failures happen before the RPC is sent; back-pressure is
            // rejected by the gateway before any broker processing.
            Self::TransientAuth(_) | Self::Auth(_) | Self::ResourceExhausted(_) => {
                Delivery::NotSent
            }
            Self::InvalidPayload(_)
            | Self::InvalidArgument(_)
            | Self::StaleJobHandle { .. }
            | Self::Closed
            | Self::Config(_) => Delivery::NotSent,
            Self::Timeout { .. }
            | Self::NotFound(_)
            | Self::Rejected { .. }
            | Self::Cancelled => Delivery::Unknown,
        }
    }

    pub fn transport(message: impl Into<String>, delivery: Delivery) -> Self {
        Self::Transport {
            message: message.into(),
            delivery,
        }
    }

    /// Map a gRPC status returned by the gateway.
    pub fn from_status(status: &tonic::Status) -> Self {
        use tonic::Code;

        let message = status.message().to_string();
        match status.code() {
            Code::Unauthenticated | Code::PermissionDenied => Self::Auth(message),
            Code::DeadlineExceeded => Self::Timeout { timeout_ms: 0 },
            Code::Unavailable => Self::transport(message, Delivery::Unknown),
            Code::ResourceExhausted => Self::ResourceExhausted(message),
            Code::NotFound => Self::NotFound(message),
            Code::InvalidArgument => Self::InvalidArgument(message),
            Code::Cancelled => Self::Cancelled,
            code => Self::Rejected {
                code: format!("{:?}", code),
                message,
            },
        }
    }
}

/// Configuration errors, raised while loading [`crate::gateway::config::ClientConfig`].
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to load {path}: {reason}")]
    File { path: String, reason: String },
}
