//! Wire primitives for the remote build/simulation protocol.
//!
//! Every frame is a UTF-8 JSON object with a `type` discriminator. Job
//! traffic is namespaced (`build-*` / `isim-*`) so both job kinds can share a
//! single connection; `project-mapping` and `error` are shared by both.

pub mod mapping;
pub mod message;
pub mod result;

pub use mapping::FileMapping;
pub use message::{ClientMessage, FrameError, Namespace, QueueInfo, ServerMessage};
pub use result::{ArtifactKind, BuildResult};

use serde::{Deserialize, Serialize};

/// Project payload handed to the server with a `*-begin` request.
///
/// The payload is assembled elsewhere; this crate only carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPayload(pub serde_json::Value);

impl JobPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Whether the payload carries the ISIM configuration a simulation needs.
    pub fn has_isim_file(&self) -> bool {
        self.0
            .pointer("/Fpga/IsimFile")
            .map(|value| !value.is_null())
            .unwrap_or(false)
    }
}

impl From<serde_json::Value> for JobPayload {
    fn from(value: serde_json::Value) -> Self {
        JobPayload(value)
    }
}
