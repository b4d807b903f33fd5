use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("Cannot get auth token. Action cancelled by user")]
    Cancelled,
    #[error("Failed to get token. Auth server denied the request")]
    Denied,
    #[error("Cannot request new auth token. Invalid response from auth server. {0}")]
    InvalidResponse(String),
}

impl From<keyring::Error> for AuthError {
    fn from(value: keyring::Error) -> Self {
        AuthError::Keyring(value.to_string())
    }
}
