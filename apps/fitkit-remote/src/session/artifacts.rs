use crate::session::SessionError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use remote_proto::{ArtifactKind, BuildResult};
use std::path::{Path, PathBuf};

pub const BUILD_DIR: &str = "build";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl SavedArtifact {
    /// Path as shown to the user, relative to the project.
    pub fn display_path(&self) -> String {
        format!("{BUILD_DIR}/{}", self.kind.file_name())
    }
}

/// Writes every binary present in `result` under `<project>/build/`.
///
/// Each artifact succeeds or fails on its own; one failure does not stop
/// the others.
pub async fn save_artifacts(
    project_dir: &Path,
    result: &BuildResult,
) -> Vec<Result<SavedArtifact, SessionError>> {
    let build_dir = project_dir.join(BUILD_DIR);
    let mut outcomes = Vec::new();
    for (kind, encoded) in result.artifacts() {
        outcomes.push(save_one(&build_dir, kind, encoded).await);
    }
    outcomes
}

async fn save_one(
    build_dir: &Path,
    kind: ArtifactKind,
    encoded: &str,
) -> Result<SavedArtifact, SessionError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|source| SessionError::ArtifactDecode { kind, source })?;
    let path = build_dir.join(kind.file_name());
    tokio::fs::create_dir_all(build_dir)
        .await
        .map_err(|source| SessionError::ArtifactPersist {
            path: build_dir.to_path_buf(),
            source,
        })?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|source| SessionError::ArtifactPersist {
            path: path.clone(),
            source,
        })?;
    Ok(SavedArtifact { kind, path })
}
