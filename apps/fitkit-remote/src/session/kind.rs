use remote_proto::Namespace;

/// The two job flavours. They share one session engine and differ in
/// message namespace, wording and what happens when the job starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Build,
    /// Opens a companion viewer on the URL carried by `isim-begin`.
    Simulate,
}

impl JobKind {
    pub fn namespace(self) -> Namespace {
        match self {
            JobKind::Build => Namespace::Build,
            JobKind::Simulate => Namespace::Isim,
        }
    }

    pub fn terminal_title(self) -> &'static str {
        match self {
            JobKind::Build => "Remote Build",
            JobKind::Simulate => "ISIM Output",
        }
    }

    pub fn request_noun(self) -> &'static str {
        match self {
            JobKind::Build => "build",
            JobKind::Simulate => "simulation",
        }
    }

    pub fn started_line(self) -> &'static str {
        match self {
            JobKind::Build => "[LOCAL] Build started on remote server",
            JobKind::Simulate => "[LOCAL] Simulation started on remote server",
        }
    }

    /// Terminal line for a connection that could not be obtained.
    pub fn connect_failure_line(self, reason: &str) -> String {
        match self {
            JobKind::Build => format!("[LOCAL] {reason}"),
            JobKind::Simulate => {
                format!("[LOCAL] Failed to connect to the build server. {reason}")
            }
        }
    }

    pub fn opens_viewer(self) -> bool {
        matches!(self, JobKind::Simulate)
    }

    pub fn needs_isim_file(self) -> bool {
        matches!(self, JobKind::Simulate)
    }
}
