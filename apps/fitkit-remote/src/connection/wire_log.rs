use parking_lot::Mutex;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Client => "[CLIENT]",
            Direction::Server => "[SERVER]",
        }
    }
}

enum LogOp {
    Append(PathBuf, String),
    Flush(oneshot::Sender<()>),
}

/// Best-effort append log of protocol traffic.
///
/// Appends are written in call order by a background task; failures are
/// logged at debug level and dropped.
pub struct WireLog {
    path: Mutex<Option<PathBuf>>,
    tx: mpsc::UnboundedSender<LogOp>,
}

impl WireLog {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx));
        Self {
            path: Mutex::new(None),
            tx,
        }
    }

    pub fn set_path(&self, path: Option<PathBuf>) {
        *self.path.lock() = path;
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }

    pub fn record<T: Serialize>(&self, direction: Direction, message: &T) {
        let Some(path) = self.path() else {
            return;
        };
        match pretty(message) {
            Ok(body) => {
                let _ = self
                    .tx
                    .send(LogOp::Append(path, format!("{} {}\n", direction.tag(), body)));
            }
            Err(err) => debug!(target: "fitkit::protocol", error = %err, "cannot render wire log entry"),
        }
    }

    /// Waits until every entry recorded so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(LogOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

fn pretty<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    message.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<LogOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            LogOp::Append(path, entry) => {
                if let Err(err) = append(&path, entry.as_bytes()).await {
                    debug!(
                        target: "fitkit::protocol",
                        path = %path.display(),
                        error = %err,
                        "wire log write failed"
                    );
                }
            }
            LogOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn records_prefixed_pretty_blocks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server_communication.log");
        let log = WireLog::spawn();
        log.set_path(Some(path.clone()));

        log.record(Direction::Client, &json!({"type": "build-end"}));
        log.record(Direction::Server, &json!({"type": "build-begin"}));
        log.flush().await;

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[CLIENT] {\n    \"type\": \"build-end\"\n}\n[SERVER] {\n    \"type\": \"build-begin\"\n}\n"
        );
    }

    #[tokio::test]
    async fn nothing_is_written_without_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let log = WireLog::spawn();
        log.record(Direction::Client, &json!({"type": "isim-end"}));
        log.flush().await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unwritable_path_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let log = WireLog::spawn();
        log.set_path(Some(dir.path().join("missing").join("wire.log")));
        log.record(Direction::Server, &json!({"type": "error", "data": "x"}));
        log.flush().await;
    }
}
