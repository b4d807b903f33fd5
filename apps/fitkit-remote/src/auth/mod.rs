pub mod error;
pub mod store;
pub mod token_request;

pub use error::AuthError;
pub use store::{KeyringStore, MemoryStore, TokenStore};
pub use token_request::{AuthPrompt, TokenRequester};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of the bearer token presented to the build server.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns the cached token, acquiring a new one when there is none.
    /// `invalidate` discards the current token first.
    async fn get_token(&self, invalidate: bool) -> Result<String, AuthError>;

    /// Forgets the token so the next `get_token` has to acquire a new one.
    fn invalidate(&self);
}

/// Token cached in memory and persisted through a [`TokenStore`].
///
/// Store failures are logged and otherwise ignored, so a machine without a
/// credential service still works for the lifetime of the process.
pub struct KeyringAuthProvider {
    store: Arc<dyn TokenStore>,
    requester: Option<TokenRequester>,
    prompt: Arc<dyn AuthPrompt>,
    cached: Mutex<Option<String>>,
    acquire: tokio::sync::Mutex<()>,
}

impl KeyringAuthProvider {
    pub fn new(
        store: Arc<dyn TokenStore>,
        requester: Option<TokenRequester>,
        prompt: Arc<dyn AuthPrompt>,
    ) -> Self {
        Self {
            store,
            requester,
            prompt,
            cached: Mutex::new(None),
            acquire: tokio::sync::Mutex::new(()),
        }
    }

    /// Token known without prompting, if any.
    pub fn current(&self) -> Option<String> {
        if let Some(token) = self.cached.lock().clone() {
            return Some(token);
        }
        self.load_stored()
    }

    fn load_stored(&self) -> Option<String> {
        match self.store.load() {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(err) => {
                warn!(target: "fitkit::auth", error = %err, "token store unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl AuthProvider for KeyringAuthProvider {
    async fn get_token(&self, invalidate: bool) -> Result<String, AuthError> {
        if invalidate {
            self.invalidate();
        }

        // one interactive request at a time
        let _guard = self.acquire.lock().await;

        if let Some(token) = self.current() {
            *self.cached.lock() = Some(token.clone());
            return Ok(token);
        }

        let requester = self.requester.as_ref().ok_or_else(|| {
            AuthError::Config("auth request and generate urls are not configured".into())
        })?;
        let token = requester.request_token(self.prompt.as_ref()).await?;
        if let Err(err) = self.store.save(&token) {
            warn!(target: "fitkit::auth", error = %err, "failed to persist auth token");
        }
        *self.cached.lock() = Some(token.clone());
        Ok(token)
    }

    fn invalidate(&self) {
        debug!(target: "fitkit::auth", "invalidating auth token");
        self.cached.lock().take();
        if let Err(err) = self.store.clear() {
            warn!(target: "fitkit::auth", error = %err, "failed to remove stored auth token");
        }
    }
}
