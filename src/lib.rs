//! Zeebe / Camunda Cloud gateway client core.
//!
//! Authenticates with OAuth client credentials, keeps one multiplexed gRPC
//! channel per cluster, and exposes the four workflow operations (create
//! process instance, publish message, complete job, fail job) with
//! idempotency-aware retries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zeebe_gateway_client::gateway::{ClientConfig, PublishMessage, ZeebeClient};
//!
//! # async fn run() -> zeebe_gateway_client::error::Result<()> {
//! let client = ZeebeClient::connect(ClientConfig::from_env()?)?;
//! let ack = client
//!     .publish_message(PublishMessage::new("orderPlaced").correlation_key("order-42"))
//!     .await?;
//! println!("published {}", ack.key);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

// Error types shared by every layer
pub mod error;

// Gateway session, transport and operations
pub mod gateway;

pub use error::{ClientError, ConfigError, Delivery, ErrorKind, Result};
pub use gateway::ZeebeClient;
