use crate::auth::AuthProvider;
use crate::config;
use crate::connection::{ConnectionError, ConnectionState, ProtocolClient};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Process-scoped holder of the shared [`ProtocolClient`].
pub struct ConnectionRegistry {
    auth: Arc<dyn AuthProvider>,
    server_address: String,
    // held across token acquisition so concurrent callers share one socket
    current: Mutex<Option<Arc<ProtocolClient>>>,
}

impl ConnectionRegistry {
    pub fn new(auth: Arc<dyn AuthProvider>, server_address: impl Into<String>) -> Self {
        Self {
            auth,
            server_address: server_address.into(),
            current: Mutex::new(None),
        }
    }

    /// Returns the live client, or creates one.
    ///
    /// A client that is still connecting counts as live. A closed one is
    /// replaced.
    pub async fn get_active(&self) -> Result<Arc<ProtocolClient>, ConnectionError> {
        let mut current = self.current.lock().await;
        if let Some(client) = current.as_ref() {
            if client.state() != ConnectionState::Closed {
                return Ok(client.clone());
            }
        }

        let address = self.server_address.trim();
        if address.is_empty() {
            return Err(ConnectionError::NotConfigured);
        }
        let endpoint = config::server_url(address)
            .map_err(|err| ConnectionError::InvalidEndpoint(format!("{address}: {err}")))?;

        let token = self.auth.get_token(false).await?;
        debug!(target: "fitkit::connection", endpoint = %endpoint, "opening shared connection");
        let client = ProtocolClient::connect(&token, endpoint, self.auth.clone());
        *current = Some(client.clone());
        Ok(client)
    }

    /// Current client, whatever its state.
    pub async fn current(&self) -> Option<Arc<ProtocolClient>> {
        self.current.lock().await.clone()
    }

    /// Closes the shared client if it is connected.
    pub async fn disconnect(&self) {
        if let Some(client) = self.current.lock().await.as_ref() {
            client.disconnect();
        }
    }
}
