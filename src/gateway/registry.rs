//! Client registry — one shared client per `(client_id, cluster_id)`.
//!
//! Callers that keep asking for a client with the same credentials get the
//! same connection and token cache back. Closing a shared client removes it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use super::client::ZeebeClient;
use super::config::ClientConfig;
use super::types::{ClusterEndpoint, SessionKey};
use crate::error::Result;

static REGISTRY: OnceLock<ClientRegistry> = OnceLock::new();

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<SessionKey, ZeebeClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ClientRegistry {
        REGISTRY.get_or_init(ClientRegistry::new)
    }

    /// Shared client from the process-wide registry.
    pub fn shared(config: ClientConfig) -> Result<ZeebeClient> {
        Self::global().get_or_connect(config)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionKey, ZeebeClient>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the open client for this config's key, creating it if needed.
    pub fn get_or_connect(&self, config: ClientConfig) -> Result<ZeebeClient> {
        let key = key_for(&config);
        let mut clients = self.lock();
        if let Some(existing) = clients.get(&key) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }
        let client = ZeebeClient::connect(config)?;
        tracing::debug!(
            client_id = %key.client_id,
            cluster_id = %key.cluster_id,
            "registered shared zeebe client"
        );
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn get(&self, key: &SessionKey) -> Option<ZeebeClient> {
        self.lock().get(key).filter(|c| !c.is_closed()).cloned()
    }

    /// Drop `client` if it is the registered one for its key.
    pub(crate) fn forget(&self, client: &ZeebeClient) {
        let key = client.session_key();
        let mut clients = self.lock();
        if clients
            .get(&key)
            .map(|registered| registered.same_client(client))
            .unwrap_or(false)
        {
            clients.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_for(config: &ClientConfig) -> SessionKey {
    let endpoint: ClusterEndpoint = config.endpoint();
    SessionKey::new(&config.credentials, &endpoint)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
