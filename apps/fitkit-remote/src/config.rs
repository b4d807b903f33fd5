use std::env;
use url::Url;

/// Port the build server listens on when the address does not name one.
pub const DEFAULT_SERVER_PORT: u16 = 9000;

/// Remote build configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Build server address, e.g. `127.0.0.1` or `zakladna.eu:9069`
    pub server_address: String,
    /// Endpoint that hands out token request ids and later the token itself
    pub auth_request_url: String,
    /// Page where the user approves a token request
    pub auth_generate_url: String,
    /// Mirror the protocol traffic of each job into the project directory
    pub log_debug_info: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            server_address: env::var("FITKIT_REMOTE_SERVER")
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            auth_request_url: env::var("FITKIT_AUTH_REQUEST_URL").unwrap_or_default(),
            auth_generate_url: env::var("FITKIT_AUTH_GENERATE_URL").unwrap_or_default(),
            log_debug_info: env_truthy("FITKIT_LOG_DEBUG_INFO"),
        }
    }
}

/// `ws://<host>/`, defaulting the port to 9000.
pub fn server_url(address: &str) -> Result<Url, url::ParseError> {
    let address = address
        .trim_start_matches("ws://")
        .trim_end_matches('/');
    let mut url = Url::parse(&format!("ws://{address}/"))?;
    if url.port().is_none() {
        // set_port only fails for cannot-be-a-base urls, which ws:// never is
        let _ = url.set_port(Some(DEFAULT_SERVER_PORT));
    }
    Ok(url)
}

pub fn env_truthy(name: &str) -> bool {
    env::var(name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
