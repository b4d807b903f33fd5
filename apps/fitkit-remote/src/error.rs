use crate::auth::AuthError;
use crate::connection::ConnectionError;
use crate::telemetry::logging::InitError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("cannot read payload {}: {source}", .path.display())]
    PayloadRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("payload {} is not valid JSON: {source}", .path.display())]
    PayloadParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Logging(#[from] InitError),
}
