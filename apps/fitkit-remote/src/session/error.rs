use crate::connection::ConnectionError;
use remote_proto::ArtifactKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Cannot find \"fpga/sim/isim.tcl\" ISIM configuration file. Simulation cannot start")]
    MissingIsimFile,
    #[error("cannot decode {} file: {source}", .kind.label())]
    ArtifactDecode {
        kind: ArtifactKind,
        source: base64::DecodeError,
    },
    #[error("cannot save {}: {source}", .path.display())]
    ArtifactPersist { path: PathBuf, source: io::Error },
}
