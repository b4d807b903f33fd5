//! Interactive acquisition of a new bearer token.
//!
//! The auth server hands out a request id, the user approves that request in
//! a browser, and we poll until the server releases the token for it.

use crate::auth::error::AuthError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const APP_NAME: &str = "FITkit Remote CLI";
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const CONFIRM_MESSAGE: &str = "For this action you need to be authenticated. If you continue, you will be required to login using your school account.";

/// User-facing side of the token flow.
#[async_trait]
pub trait AuthPrompt: Send + Sync {
    /// Asks whether to continue. `false` aborts the flow.
    async fn confirm(&self, message: &str) -> bool;

    /// Presents the page where the user approves the request.
    fn show_verification(&self, url: &Url);

    /// Resolves when the user gives up waiting.
    async fn cancelled(&self);
}

#[derive(Debug, Clone)]
pub struct TokenRequester {
    client: Client,
    request_url: Url,
    generate_url: Url,
    poll_interval: Duration,
}

impl TokenRequester {
    pub fn new(request_url: &str, generate_url: &str) -> Result<Self, AuthError> {
        let request_url = parse_endpoint("auth request", request_url)?;
        let generate_url = parse_endpoint("auth generate", generate_url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| AuthError::Config(err.to_string()))?;
        Ok(Self {
            client,
            request_url,
            generate_url,
            poll_interval: POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn verification_url(&self, request_id: &str) -> Url {
        let mut url = self.generate_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("request", request_id)
            .append_pair("appname", APP_NAME);
        url
    }

    pub async fn request_token(&self, prompt: &dyn AuthPrompt) -> Result<String, AuthError> {
        if !prompt.confirm(CONFIRM_MESSAGE).await {
            return Err(AuthError::Cancelled);
        }

        let request_id = self.new_request_id().await?;
        let url = self.verification_url(&request_id);
        info!(target: "fitkit::auth", request = %request_id, "waiting for user verification");
        prompt.show_verification(&url);

        loop {
            tokio::select! {
                _ = prompt.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            if let Some(token) = self.poll(&request_id).await? {
                info!(target: "fitkit::auth", "received auth token");
                return Ok(token);
            }
        }
    }

    async fn new_request_id(&self) -> Result<String, AuthError> {
        let mut url = self.request_url.clone();
        url.set_query(Some("new"));
        let id = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let id = id.trim();
        if id.is_empty() {
            return Err(AuthError::InvalidResponse("Request id is empty".into()));
        }
        Ok(id.to_string())
    }

    /// One status check. `None` while the request is still pending.
    async fn poll(&self, request_id: &str) -> Result<Option<String>, AuthError> {
        let mut url = self.request_url.clone();
        url.query_pairs_mut().clear().append_pair("request", request_id);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|_| AuthError::Denied)?;
        if !response.status().is_success() {
            debug!(target: "fitkit::auth", status = %response.status(), "token request rejected");
            return Err(AuthError::Denied);
        }
        let body = response.text().await.map_err(|_| AuthError::Denied)?;
        let token = body.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }
}

fn parse_endpoint(label: &str, raw: &str) -> Result<Url, AuthError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AuthError::Config(format!("{label} url is not configured")));
    }
    Url::parse(raw).map_err(|err| AuthError::Config(format!("invalid {label} url '{raw}': {err}")))
}
