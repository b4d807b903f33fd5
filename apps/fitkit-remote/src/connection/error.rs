use crate::auth::AuthError;
use remote_proto::FrameError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure to obtain a client from the registry.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Remote build server address is not configured")]
    NotConfigured,
    #[error("invalid build server address: {0}")]
    InvalidEndpoint(String),
}

/// Failure on an established or establishing channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{0}")]
    AuthRejected(String),
    #[error("{0}")]
    ConnectFailed(String),
    #[error("malformed server frame: {0}")]
    Malformed(String),
}

impl ProtocolError {
    pub fn from_connect_error(err: &tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
                ProtocolError::AuthRejected(
                    "Server responded with a non-101 status: 401 Unauthorized".to_string(),
                )
            }
            other => ProtocolError::ConnectFailed(other.to_string()),
        }
    }

    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, ProtocolError::AuthRejected(_))
    }
}

impl From<FrameError> for ProtocolError {
    fn from(value: FrameError) -> Self {
        ProtocolError::Malformed(value.to_string())
    }
}
