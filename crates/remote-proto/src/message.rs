use crate::{BuildResult, FileMapping, JobPayload};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message-type prefix distinguishing the two job kinds on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Build,
    Isim,
}

impl Namespace {
    pub fn begin_request(self, payload: JobPayload) -> ClientMessage {
        match self {
            Namespace::Build => ClientMessage::BuildBegin { data: payload },
            Namespace::Isim => ClientMessage::IsimBegin { data: payload },
        }
    }

    pub fn end_notice(self) -> ClientMessage {
        match self {
            Namespace::Build => ClientMessage::BuildEnd,
            Namespace::Isim => ClientMessage::IsimEnd,
        }
    }
}

/// Scheduler position of a job waiting on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub pos: u32,
    pub size: u32,
}

impl QueueInfo {
    /// First in line; the job is about to run.
    pub fn is_next(&self) -> bool {
        self.pos == 1
    }
}

/// Client -> server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    BuildBegin { data: JobPayload },
    BuildEnd,
    IsimBegin { data: JobPayload },
    IsimEnd,
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::BuildBegin { .. } => "build-begin",
            ClientMessage::BuildEnd => "build-end",
            ClientMessage::IsimBegin { .. } => "isim-begin",
            ClientMessage::IsimEnd => "isim-end",
        }
    }
}

/// Server -> client frames.
///
/// A well-formed frame whose `type` is not listed decodes to `Unknown` and
/// is ignored by the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    BuildBegin,
    BuildEnd { data: BuildResult },
    BuildQueue { data: QueueInfo },
    BuildStdout { data: String },
    BuildStderr { data: String },
    /// Carries the URL of the simulation viewer stream.
    IsimBegin { data: String },
    IsimEnd,
    IsimQueue { data: QueueInfo },
    IsimStdout { data: String },
    IsimStderr { data: String },
    ProjectMapping { data: FileMapping },
    Error { data: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not a valid server message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue position {pos} out of {size} is not a valid queue state")]
    InvalidQueue { pos: u32, size: u32 },
}

impl ServerMessage {
    /// Decodes and validates one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let message: ServerMessage = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        match self {
            ServerMessage::BuildQueue { data } | ServerMessage::IsimQueue { data } => {
                if data.pos == 0 || data.size < data.pos {
                    return Err(FrameError::InvalidQueue {
                        pos: data.pos,
                        size: data.size,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
