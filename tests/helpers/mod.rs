//! Shared test rig: an in-process Zeebe gateway (tonic) and an OAuth token
//! endpoint (axum), both on random local ports.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::StreamExt;
use tonic::transport::Server;
use tonic::{Request, Status};

use zeebe_gateway_client::gateway::proto::gateway_server::{Gateway, GatewayServer};
use zeebe_gateway_client::gateway::proto::{
    BrokerInfo, CompleteJobRequest, CompleteJobResponse, CreateProcessInstanceRequest,
    CreateProcessInstanceResponse, FailJobRequest, FailJobResponse, Partition,
    PublishMessageRequest, PublishMessageResponse, TopologyRequest, TopologyResponse,
};
use zeebe_gateway_client::gateway::{ClientConfig, Credentials, RetryPolicy};

pub const CLIENT_ID: &str = "test-client";
pub const CLIENT_SECRET: &str = "test-secret";
pub const CLUSTER_ID: &str = "test-cluster";

// ---------------------------------------------------------------------------
// Fake gateway
// ---------------------------------------------------------------------------

/// Observable state of the fake gateway.
#[derive(Default)]
pub struct GatewayState {
    next_key: AtomicI64,
    /// BPMN process ids that can be instantiated.
    pub deployed: Mutex<HashSet<String>>,
    /// Activated jobs waiting for an outcome.
    pub active_jobs: Mutex<HashSet<i64>>,
    /// (name, correlation key, message id) → message key.
    messages: Mutex<HashMap<(String, String, String), i64>>,
    pub instances: Mutex<Vec<CreateProcessInstanceRequest>>,
    pub publishes: Mutex<Vec<PublishMessageRequest>>,
    pub completions: Mutex<Vec<CompleteJobRequest>>,
    pub failures: Mutex<Vec<FailJobRequest>>,
    /// Bearer tokens the gateway answers with UNAUTHENTICATED.
    pub rejected_tokens: Mutex<HashSet<String>>,
    /// Every bearer token seen, in order.
    pub seen_tokens: Mutex<Vec<String>>,
    /// Sleep applied before answering publish and topology calls.
    pub delay: Mutex<Option<Duration>>,
    /// Publish/topology calls still to be answered with UNAVAILABLE.
    unavailable: AtomicU32,
    /// TCP connections accepted.
    pub connections: AtomicU32,
}

impl GatewayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_key: AtomicI64::new(2251799813685249),
            ..Default::default()
        })
    }

    pub fn deploy(&self, bpmn_process_id: &str) {
        self.deployed
            .lock()
            .unwrap()
            .insert(bpmn_process_id.to_string());
    }

    pub fn activate_job(&self, job_key: i64) {
        self.active_jobs.lock().unwrap().insert(job_key);
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens
            .lock()
            .unwrap()
            .insert(token.to_string());
    }

    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_unavailable(&self, times: u32) {
        self.unavailable.store(times, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Injected delay and UNAVAILABLE answers.
    async fn disrupt(&self) -> Result<(), Status> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Status::unavailable("broker connection lost"));
        }
        Ok(())
    }

    fn key(&self) -> i64 {
        self.next_key.fetch_add(1, Ordering::SeqCst)
    }

    fn authorize<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("missing authorization"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Status::unauthenticated("not a bearer token"))?
            .to_string();
        self.seen_tokens.lock().unwrap().push(token.clone());
        if self.rejected_tokens.lock().unwrap().contains(&token) {
            return Err(Status::unauthenticated("token expired"));
        }
        Ok(())
    }
}

pub struct FakeGateway {
    state: Arc<GatewayState>,
}

#[tonic::async_trait]
impl Gateway for FakeGateway {
    async fn create_process_instance(
        &self,
        request: Request<CreateProcessInstanceRequest>,
    ) -> Result<tonic::Response<CreateProcessInstanceResponse>, Status> {
        self.state.authorize(&request)?;
        let req = request.into_inner();
        if !self.state.deployed.lock().unwrap().contains(&req.bpmn_process_id) {
            return Err(Status::not_found(format!(
                "no process with id '{}' deployed",
                req.bpmn_process_id
            )));
        }
        let response = CreateProcessInstanceResponse {
            process_definition_key: 1,
            bpmn_process_id: req.bpmn_process_id.clone(),
            version: if req.version < 0 { 1 } else { req.version },
            process_instance_key: self.state.key(),
            tenant_id: String::new(),
        };
        self.state.instances.lock().unwrap().push(req);
        Ok(tonic::Response::new(response))
    }

    async fn publish_message(
        &self,
        request: Request<PublishMessageRequest>,
    ) -> Result<tonic::Response<PublishMessageResponse>, Status> {
        self.state.authorize(&request)?;
        self.state.disrupt().await?;
        let req = request.into_inner();
        let id = (
            req.name.clone(),
            req.correlation_key.clone(),
            req.message_id.clone(),
        );
        let key = {
            let mut messages = self.state.messages.lock().unwrap();
            match messages.get(&id) {
                Some(key) => *key,
                None => {
                    let key = self.state.key();
                    messages.insert(id, key);
                    key
                }
            }
        };
        self.state.publishes.lock().unwrap().push(req);
        Ok(tonic::Response::new(PublishMessageResponse {
            key,
            tenant_id: String::new(),
        }))
    }

    async fn complete_job(
        &self,
        request: Request<CompleteJobRequest>,
    ) -> Result<tonic::Response<CompleteJobResponse>, Status> {
        self.state.authorize(&request)?;
        let req = request.into_inner();
        if !self.state.active_jobs.lock().unwrap().remove(&req.job_key) {
            return Err(Status::not_found(format!("job {} not found", req.job_key)));
        }
        self.state.completions.lock().unwrap().push(req);
        Ok(tonic::Response::new(CompleteJobResponse {}))
    }

    async fn fail_job(
        &self,
        request: Request<FailJobRequest>,
    ) -> Result<tonic::Response<FailJobResponse>, Status> {
        self.state.authorize(&request)?;
        let req = request.into_inner();
        if !self.state.active_jobs.lock().unwrap().remove(&req.job_key) {
            return Err(Status::not_found(format!("job {} not found", req.job_key)));
        }
        self.state.failures.lock().unwrap().push(req);
        Ok(tonic::Response::new(FailJobResponse {}))
    }

    async fn topology(
        &self,
        request: Request<TopologyRequest>,
    ) -> Result<tonic::Response<TopologyResponse>, Status> {
        self.state.authorize(&request)?;
        self.state.disrupt().await?;
        Ok(tonic::Response::new(TopologyResponse {
            brokers: vec![BrokerInfo {
                node_id: 0,
                host: "broker-0".into(),
                port: 26501,
                partitions: vec![Partition {
                    partition_id: 1,
                    role: 0,
                    health: 0,
                }],
                version: "8.5.0".into(),
            }],
            cluster_size: 1,
            partitions_count: 1,
            replication_factor: 1,
            gateway_version: "8.5.0".into(),
        }))
    }
}

/// Start the fake gateway on a random port.
pub async fn spawn_gateway(state: Arc<GatewayState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind gateway listener");
    let addr = listener.local_addr().expect("Failed to get local address");
    let counter = state.clone();
    let incoming = TcpListenerStream::new(listener).map(move |conn| {
        counter.connections.fetch_add(1, Ordering::SeqCst);
        conn
    });
    let service = FakeGateway { state };

    tokio::spawn(async move {
        Server::builder()
            .add_service(GatewayServer::new(service))
            .serve_with_incoming(incoming)
            .await
            .expect("gRPC server failed");
    });

    // Small delay to let the server start accepting
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

// ---------------------------------------------------------------------------
// Fake OAuth endpoint
// ---------------------------------------------------------------------------

pub struct OAuthState {
    pub requests: AtomicU32,
    pub expires_in: u64,
    pub audiences: Mutex<Vec<String>>,
}

impl OAuthState {
    pub fn new(expires_in: u64) -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicU32::new(0),
            expires_in,
            audiences: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    client_id: String,
    client_secret: String,
    audience: String,
    grant_type: String,
}

async fn issue_token(
    State(state): State<Arc<OAuthState>>,
    Json(body): Json<TokenRequest>,
) -> Response {
    let n = state.requests.fetch_add(1, Ordering::SeqCst) + 1;
    state.audiences.lock().unwrap().push(body.audience.clone());

    if body.grant_type != "client_credentials"
        || body.client_id != CLIENT_ID
        || body.client_secret != CLIENT_SECRET
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "access_denied"})),
        )
            .into_response();
    }

    Json(serde_json::json!({
        "access_token": format!("token-{}", n),
        "expires_in": state.expires_in,
        "token_type": "Bearer",
    }))
    .into_response()
}

/// Start the fake token endpoint; returns its URL.
pub async fn spawn_oauth(state: Arc<OAuthState>) -> String {
    let app = Router::new()
        .route("/oauth/token", post(issue_token))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind oauth listener");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("oauth server failed");
    });

    format!("http://{}/oauth/token", addr)
}

// ---------------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------------

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    }
}

pub fn client_config(gateway: SocketAddr, oauth_url: &str) -> ClientConfig {
    ClientConfig::new(Credentials::new(CLIENT_ID, CLIENT_SECRET), CLUSTER_ID)
        .with_gateway_address(format!("127.0.0.1:{}", gateway.port()))
        .with_authorization_server(oauth_url)
        .with_request_timeout(Duration::from_secs(5))
        .with_retry(fast_retry())
}

/// Gateway + token endpoint + config pointing at both.
pub struct TestRig {
    pub gateway: Arc<GatewayState>,
    pub oauth: Arc<OAuthState>,
    pub config: ClientConfig,
}

impl TestRig {
    pub async fn start() -> Self {
        let gateway = GatewayState::new();
        let oauth = OAuthState::new(3600);
        let addr = spawn_gateway(gateway.clone()).await;
        let url = spawn_oauth(oauth.clone()).await;
        Self {
            gateway,
            oauth,
            config: client_config(addr, &url),
        }
    }
}
