use serde::{Deserialize, Serialize};

/// Outcome of a finished remote build, carried by `build-end`.
///
/// Binaries are base64 on the wire and every one of them is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildResult {
    pub exit_status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fpga_binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcu_v1_binary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcu_v2_binary: Option<String>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&str> {
        match kind {
            ArtifactKind::Fpga => self.fpga_binary.as_deref(),
            ArtifactKind::McuV1 => self.mcu_v1_binary.as_deref(),
            ArtifactKind::McuV2 => self.mcu_v2_binary.as_deref(),
        }
    }

    /// Present artifacts, in a fixed kind order.
    pub fn artifacts(&self) -> impl Iterator<Item = (ArtifactKind, &str)> {
        ArtifactKind::ALL
            .into_iter()
            .filter_map(move |kind| self.artifact(kind).map(|data| (kind, data)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Fpga,
    McuV1,
    McuV2,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [ArtifactKind::Fpga, ArtifactKind::McuV1, ArtifactKind::McuV2];

    /// Fixed file name under the project's `build/` directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::Fpga => "output.bin",
            ArtifactKind::McuV1 => "output_f1xx.hex",
            ArtifactKind::McuV2 => "output_f2xx.hex",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Fpga => "FPGA bin",
            ArtifactKind::McuV1 => "MCU v1.x",
            ArtifactKind::McuV2 => "MCU v2.x",
        }
    }
}
