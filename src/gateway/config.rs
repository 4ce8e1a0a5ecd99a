//! Client configuration — load from environment or YAML.
//!
//! `from_env` reads the `ZEEBE_*` / `CAMUNDA_*` variables (binaries call
//! `dotenvy::dotenv()` first so a `.env` file works). `load_from_file` reads
//! the same settings from YAML.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::{millis, RetryPolicy};
use super::session::{
    DEFAULT_AUTHORIZATION_SERVER_URL, DEFAULT_REFRESH_MARGIN, DEFAULT_TOKEN_AUDIENCE,
};
use super::types::{ClusterEndpoint, Credentials, DEFAULT_REGION};
use crate::error::ConfigError;

pub const ENV_CLIENT_ID: &str = "ZEEBE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "ZEEBE_CLIENT_SECRET";
pub const ENV_CLUSTER_ID: &str = "CAMUNDA_CLUSTER_ID";
pub const ENV_CLUSTER_REGION: &str = "CAMUNDA_CLUSTER_REGION";
pub const ENV_ADDRESS: &str = "ZEEBE_ADDRESS";
pub const ENV_AUTHORIZATION_SERVER_URL: &str = "ZEEBE_AUTHORIZATION_SERVER_URL";
pub const ENV_TOKEN_AUDIENCE: &str = "ZEEBE_TOKEN_AUDIENCE";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ZEEBE_REQUEST_TIMEOUT_MS";
pub const ENV_MAX_ATTEMPTS: &str = "ZEEBE_MAX_ATTEMPTS";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on the token refresh margin.
pub const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Everything needed to open a [`super::client::ZeebeClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default = "default_region")]
    pub cluster_region: String,
    /// Overrides the Camunda Cloud address template.
    #[serde(default)]
    pub gateway_address: Option<String>,
    #[serde(default = "default_auth_url")]
    pub authorization_server_url: String,
    #[serde(default = "default_audience")]
    pub token_audience: String,
    #[serde(
        default = "default_request_timeout",
        with = "millis",
        rename = "request_timeout_ms"
    )]
    pub request_timeout: Duration,
    #[serde(
        default = "default_connect_timeout",
        with = "millis",
        rename = "connect_timeout_ms"
    )]
    pub connect_timeout: Duration,
    #[serde(
        default = "default_refresh_margin",
        with = "millis",
        rename = "refresh_margin_ms"
    )]
    pub refresh_margin: Duration,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_AUTHORIZATION_SERVER_URL.to_string()
}

fn default_audience() -> String {
    DEFAULT_TOKEN_AUDIENCE.to_string()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_refresh_margin() -> Duration {
    DEFAULT_REFRESH_MARGIN
}

impl ClientConfig {
    /// Config for a Camunda Cloud cluster with every other setting defaulted.
    pub fn new(credentials: Credentials, cluster_id: impl Into<String>) -> Self {
        Self {
            credentials,
            cluster_id: Some(cluster_id.into()),
            cluster_region: default_region(),
            gateway_address: None,
            authorization_server_url: default_auth_url(),
            token_audience: default_audience(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.cluster_region = region.into();
        self
    }

    pub fn with_gateway_address(mut self, address: impl Into<String>) -> Self {
        self.gateway_address = Some(address.into());
        self
    }

    pub fn with_authorization_server(mut self, url: impl Into<String>) -> Self {
        self.authorization_server_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = get(ENV_CLIENT_ID).ok_or(ConfigError::Missing(ENV_CLIENT_ID))?;
        let client_secret =
            get(ENV_CLIENT_SECRET).ok_or(ConfigError::Missing(ENV_CLIENT_SECRET))?;

        let mut config = Self {
            credentials: Credentials::new(client_id, client_secret),
            cluster_id: get(ENV_CLUSTER_ID),
            cluster_region: get(ENV_CLUSTER_REGION).unwrap_or_else(default_region),
            gateway_address: get(ENV_ADDRESS),
            authorization_server_url: get(ENV_AUTHORIZATION_SERVER_URL)
                .unwrap_or_else(default_auth_url),
            token_audience: get(ENV_TOKEN_AUDIENCE).unwrap_or_else(default_audience),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            retry: RetryPolicy::default(),
        };

        if let Some(raw) = get(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout =
                Duration::from_millis(parse_number(ENV_REQUEST_TIMEOUT_MS, &raw)?);
        }
        if let Some(raw) = get(ENV_MAX_ATTEMPTS) {
            let attempts = parse_number(ENV_MAX_ATTEMPTS, &raw)?;
            config.retry.max_attempts = u32::try_from(attempts).map_err(|_| ConfigError::Invalid {
                name: ENV_MAX_ATTEMPTS,
                reason: format!("{} is out of range", attempts),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::load_from_str(&content).map_err(|e| match e {
            ConfigError::File { reason, .. } => ConfigError::File {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Load from a YAML string.
    pub fn load_from_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::File {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.client_id.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_CLIENT_ID));
        }
        if self.credentials.client_secret.is_empty() {
            return Err(ConfigError::Missing(ENV_CLIENT_SECRET));
        }
        if self.cluster_id.is_none() && self.gateway_address.is_none() {
            return Err(ConfigError::Missing(ENV_CLUSTER_ID));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                name: ENV_REQUEST_TIMEOUT_MS,
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_MAX_ATTEMPTS,
                reason: "must be at least 1".to_string(),
            });
        }
        if self.refresh_margin > MAX_REFRESH_MARGIN {
            return Err(ConfigError::Invalid {
                name: "refresh_margin_ms",
                reason: format!("must not exceed {}ms", MAX_REFRESH_MARGIN.as_millis()),
            });
        }
        url::Url::parse(&self.authorization_server_url).map_err(|e| ConfigError::Invalid {
            name: ENV_AUTHORIZATION_SERVER_URL,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// The resolved gateway endpoint.
    pub fn endpoint(&self) -> ClusterEndpoint {
        match (&self.cluster_id, &self.gateway_address) {
            (Some(id), None) => ClusterEndpoint::from_cluster(id, &self.cluster_region),
            (Some(id), Some(addr)) => ClusterEndpoint::with_address(id, &self.cluster_region, addr),
            // Self-managed gateway without a cluster id: the address identifies it.
            (None, Some(addr)) => ClusterEndpoint::with_address(addr, &self.cluster_region, addr),
            (None, None) => ClusterEndpoint::from_cluster("", &self.cluster_region),
        }
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
        name,
        reason: format!("'{}': {}", raw, e),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
