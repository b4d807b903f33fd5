//! One remote job, end to end.
//!
//! A [`JobSession`] acquires the shared client, sends the begin request once
//! the client is connected, relays the job's namespaced events to its
//! [`TerminalSink`] and tears everything down exactly once, whichever of
//! server end, user close or connection loss comes first.

pub mod artifacts;
pub mod error;
pub mod kind;
pub mod viewer;

pub use artifacts::{save_artifacts, SavedArtifact, BUILD_DIR};
pub use error::SessionError;
pub use kind::JobKind;
pub use viewer::{BrowserViewer, BrowserViewerFactory, Viewer, ViewerFactory, ViewerSlot};

use crate::connection::{ConnectionRegistry, ConnectionState, ProtocolClient};
use crate::events::{Disposables, EventChannel};
use crate::terminal::{paint, TerminalSink};
use crossterm::style::Color;
use parking_lot::Mutex;
use remote_proto::{BuildResult, JobPayload, QueueInfo};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const WIRE_LOG_FILE: &str = "server_communication.log";

const QUEUE_FULL_NOTICE: &str =
    "[LOCAL] Unfortunately, the server is at maximum capacity. Your task has been placed in queue.";
const QUEUE_CANCEL_NOTICE: &str = "[LOCAL] You can cancel this task by killing this terminal (note that by doing this you will lose your position in the queue)";
const QUEUE_NEXT_NOTICE: &str = "[LOCAL] You are first in the queue. Your task is starting soon...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Acquiring,
    Connected,
    Requested,
    Running,
    Closed,
}

/// Process-scoped services a session borrows.
#[derive(Clone)]
pub struct SessionContext {
    pub connections: Arc<ConnectionRegistry>,
    pub viewers: Arc<ViewerSlot>,
    pub log_debug_info: bool,
}

pub struct JobSession {
    kind: JobKind,
    payload: JobPayload,
    project_dir: PathBuf,
    sink: Arc<TerminalSink>,
    context: SessionContext,
    client: Mutex<Option<Arc<ProtocolClient>>>,
    viewer: Mutex<Option<Arc<dyn Viewer>>>,
    disposables: Disposables,
    phase: Mutex<SessionPhase>,
    queue_banner_shown: AtomicBool,
    request_sent: AtomicBool,
    closing: AtomicBool,
    failure_reported: AtomicBool,
    on_did_close: EventChannel<()>,
    closed_tx: watch::Sender<bool>,
    this: Weak<JobSession>,
}

impl JobSession {
    pub fn new(
        kind: JobKind,
        payload: JobPayload,
        project_dir: impl Into<PathBuf>,
        sink: Arc<TerminalSink>,
        context: SessionContext,
    ) -> Arc<Self> {
        let project_dir = project_dir.into();
        let session = Arc::new_cyclic(|this| Self {
            kind,
            payload,
            project_dir,
            sink,
            context,
            client: Mutex::new(None),
            viewer: Mutex::new(None),
            disposables: Disposables::new(),
            phase: Mutex::new(SessionPhase::Idle),
            queue_banner_shown: AtomicBool::new(false),
            request_sent: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            failure_reported: AtomicBool::new(false),
            on_did_close: EventChannel::new(),
            closed_tx: watch::channel(false).0,
            this: this.clone(),
        });
        session.listen(session.sink.on_did_close(), |session, _| {
            debug!(target: "fitkit::session", "terminal closed by user");
            session.close(None);
        });
        session
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn sink(&self) -> &Arc<TerminalSink> {
        &self.sink
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    pub fn client(&self) -> Option<Arc<ProtocolClient>> {
        self.client.lock().clone()
    }

    /// Fires once, when teardown has finished.
    pub fn on_did_close(&self) -> &EventChannel<()> {
        &self.on_did_close
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    /// Resolves once teardown has finished, artifacts included.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Runs the job: acquires the shared client and requests the job once
    /// it is connected. Failures are reported in the terminal and close the
    /// session.
    pub async fn start(self: Arc<Self>) {
        if self.is_closing() {
            return;
        }
        self.set_phase(SessionPhase::Acquiring);

        if self.kind.needs_isim_file() {
            self.sink.write_line("[LOCAL] Preparing simulation...");
            if !self.payload.has_isim_file() {
                self.sink
                    .error_line(&format!("[LOCAL] {}", SessionError::MissingIsimFile));
                self.close(None);
                return;
            }
        }

        self.sink
            .write_line("[LOCAL] Establishing connection to build server...");
        let client = match self.context.connections.get_active().await {
            Ok(client) => client,
            Err(err) => {
                let err = SessionError::from(err);
                warn!(target: "fitkit::session", error = %err, "cannot acquire connection");
                self.sink
                    .error_line(&self.kind.connect_failure_line(&err.to_string()));
                self.close(None);
                return;
            }
        };
        if self.is_closing() {
            return;
        }
        *self.client.lock() = Some(client.clone());

        if self.context.log_debug_info {
            let path = self.project_dir.join(WIRE_LOG_FILE);
            let _ = tokio::fs::remove_file(&path).await;
            if self.is_closing() {
                return;
            }
            client.set_log_path(Some(path));
            // teardown may have cleared the path between the check and the set
            if self.is_closing() {
                client.set_log_path(None);
                return;
            }
        } else {
            client.set_log_path(None);
        }

        self.subscribe(&client);

        // subscribed first, so a transition racing this check is still seen
        match client.state() {
            ConnectionState::Connected => self.send_request(),
            ConnectionState::Closed => {
                if self.is_closing() {
                    return;
                }
                if let Some(failure) = client.failure() {
                    self.report_failure(&failure);
                }
                self.close(None);
            }
            ConnectionState::Connecting => {}
        }
    }

    fn subscribe(&self, client: &ProtocolClient) {
        let events = client.events();
        let job = events.namespace(self.kind.namespace());

        self.listen(&job.begin, |session, url: &Option<String>| {
            session.on_begin(url.as_deref())
        });
        self.listen(&job.stderr, |session, line: &String| session.sink.error_line(line));
        self.listen(&job.stdout, |session, line: &String| session.sink.write_line(line));
        self.listen(&job.end, |session, result: &Option<BuildResult>| {
            session.close(result.clone())
        });
        self.listen(&job.queue, |session, info: &QueueInfo| session.on_queue(*info));
        self.listen(&events.project_mapping, |session, mapping| {
            session.sink.load_file_mapping(Some(mapping.clone()))
        });
        self.listen(&events.server_error, |session, err: &String| {
            session.on_server_error(err)
        });
        self.listen(&events.closed, |session, code| {
            debug!(target: "fitkit::session", code = %code, "connection closed");
            session.close(None)
        });
        self.listen(&events.connected, |session, _| session.send_request());
    }

    fn listen<T, F>(&self, channel: &EventChannel<T>, handler: F)
    where
        T: 'static,
        F: Fn(&JobSession, &T) + Send + Sync + 'static,
    {
        let this = self.this.clone();
        self.disposables.push(channel.subscribe(move |value| {
            if let Some(session) = this.upgrade() {
                handler(&session, value);
            }
        }));
    }

    fn send_request(&self) {
        if self.is_closing() {
            return;
        }
        let Some(client) = self.client() else {
            return;
        };
        if self.request_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_phase(SessionPhase::Connected);
        self.sink.write_line(&format!(
            "[LOCAL] Connection established. Sending {} request...",
            self.kind.request_noun()
        ));
        client.send(self.kind.namespace().begin_request(self.payload.clone()));
        self.set_phase(SessionPhase::Requested);
    }

    fn on_begin(&self, viewer_url: Option<&str>) {
        self.set_phase(SessionPhase::Running);
        self.sink.write_line(self.kind.started_line());
        if !self.kind.opens_viewer() {
            return;
        }

        let Some(url) = viewer_url else {
            warn!(target: "fitkit::session", "simulation began without a viewer url");
            return;
        };
        match self.context.viewers.open(url) {
            Ok(viewer) => {
                self.sink
                    .write_line(&format!("[LOCAL] Simulation view available at {url}"));
                self.listen(viewer.on_did_close(), |session, _| {
                    debug!(target: "fitkit::session", "simulation viewer closed");
                    session.close(None)
                });
                *self.viewer.lock() = Some(viewer);
            }
            Err(err) => self.sink.error_line(&format!("[LOCAL] {err}")),
        }
    }

    fn on_server_error(&self, text: &str) {
        let failure = self.client().and_then(|client| client.failure());
        if failure.as_deref() == Some(text) {
            self.report_failure(text);
        } else {
            self.sink.error_line(&format!("Server error: {text}"));
        }
    }

    /// Prints the client's connect failure. The state check in `start` and
    /// the `server_error` event can both observe it; only one line is shown.
    fn report_failure(&self, failure: &str) {
        if !self.failure_reported.swap(true, Ordering::AcqRel) {
            self.sink.error_line(&format!("Server error: {failure}"));
        }
    }

    fn on_queue(&self, info: QueueInfo) {
        if !self.queue_banner_shown.swap(true, Ordering::AcqRel) {
            self.sink.write_line("");
            self.sink.write_line(&paint(QUEUE_FULL_NOTICE, Color::Yellow));
            self.sink.write_line(&paint(QUEUE_CANCEL_NOTICE, Color::Yellow));
            self.sink.write_line("");
        }
        self.sink.write_line(&format!(
            "[LOCAL] Your current position in the queue: {} out of {} waiting task(s)",
            info.pos, info.size
        ));
        if info.is_next() {
            self.sink.write_line(QUEUE_NEXT_NOTICE);
        }
    }

    /// Tears the session down. Only the first call has any effect.
    ///
    /// `result` is the outcome carried by `build-end`; its artifacts are
    /// written before the session reports itself closed.
    pub fn close(&self, result: Option<BuildResult>) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(target: "fitkit::session", kind = ?self.kind, "closing session");

        self.disposables.dispose_all();

        let client = self.client();
        if let Some(client) = &client {
            client.send(self.kind.namespace().end_notice());
        }

        let viewer = self.viewer.lock().take();
        if let Some(viewer) = viewer {
            self.context.viewers.close(&viewer);
        }

        let Some(result) = result else {
            self.finish(client);
            return;
        };
        match (self.this.upgrade(), tokio::runtime::Handle::try_current()) {
            (Some(session), Ok(runtime)) => {
                runtime.spawn(async move {
                    session.report_result(&result).await;
                    session.finish(client);
                });
            }
            _ => {
                warn!(target: "fitkit::session", "no runtime available; build artifacts not saved");
                self.finish(client);
            }
        }
    }

    async fn report_result(&self, result: &BuildResult) {
        if result.succeeded() {
            self.sink.write_line(&paint(
                "\n\n[LOCAL] BUILD SUCCESS! Saving files...",
                Color::Green,
            ));
        } else {
            self.sink.error_line(&format!(
                "[LOCAL] Build failed with exit status {}",
                result.exit_status
            ));
        }

        for outcome in save_artifacts(&self.project_dir, result).await {
            match outcome {
                Ok(saved) => {
                    info!(target: "fitkit::session", path = %saved.path.display(), "artifact saved");
                    self.sink.write_line(&paint(
                        &format!(
                            "[LOCAL] {} file saved to {}",
                            saved.kind.label(),
                            saved.display_path()
                        ),
                        Color::Green,
                    ));
                }
                Err(err) => {
                    warn!(target: "fitkit::session", error = %err, "artifact not saved");
                    self.sink.error_line(&format!("[LOCAL] {err}"));
                }
            }
        }
    }

    fn finish(&self, client: Option<Arc<ProtocolClient>>) {
        self.sink.arm_idle_close();
        self.set_phase(SessionPhase::Closed);
        self.on_did_close.emit(&());
        self.closed_tx.send_replace(true);
        if let Some(client) = client {
            client.set_log_path(None);
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut current = self.phase.lock();
        if *current != SessionPhase::Closed {
            *current = phase;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::viewer::testing::RecordingFactory;
    use super::*;
    use crate::auth::{AuthError, AuthProvider};
    use crate::terminal::SurfaceRegistry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingAuth {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        async fn get_token(&self, _invalidate: bool) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::Cancelled)
        }

        fn invalidate(&self) {}
    }

    struct Harness {
        session: Arc<JobSession>,
        output: Arc<Mutex<Vec<String>>>,
        auth: Arc<CountingAuth>,
        viewers: Arc<RecordingFactory>,
        _sub: crate::events::Subscription,
    }

    fn harness(kind: JobKind, payload: serde_json::Value, address: &str) -> Harness {
        let auth = Arc::new(CountingAuth::default());
        let factory = Arc::new(RecordingFactory::default());
        let context = SessionContext {
            connections: Arc::new(ConnectionRegistry::new(auth.clone(), address)),
            viewers: Arc::new(ViewerSlot::new(factory.clone())),
            log_debug_info: false,
        };
        let sink = TerminalSink::new(kind.terminal_title(), SurfaceRegistry::new());
        let output = Arc::new(Mutex::new(Vec::new()));
        let writer = output.clone();
        let sub = sink
            .on_did_write()
            .subscribe(move |chunk: &String| writer.lock().push(chunk.clone()));
        sink.open();
        let session = JobSession::new(kind, JobPayload::new(payload), "/tmp/project", sink, context);
        Harness {
            session,
            output,
            auth,
            viewers: factory,
            _sub: sub,
        }
    }

    impl Harness {
        fn text(&self) -> String {
            self.output.lock().concat()
        }
    }

    #[tokio::test]
    async fn simulation_without_isim_file_never_connects() {
        let h = harness(JobKind::Simulate, json!({"Fpga": {}}), "127.0.0.1");
        h.session.clone().start().await;

        assert!(h.text().contains("ISIM configuration file"));
        assert!(h.session.is_closed());
        assert!(h.session.sink().is_armed());
        assert_eq!(h.auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn acquisition_failure_is_reported_and_closes() {
        let h = harness(JobKind::Build, json!({}), "");
        h.session.clone().start().await;

        let text = h.text();
        assert!(text.contains("Establishing connection to build server"));
        assert!(text.contains("not configured"));
        assert!(h.session.is_closed());
        assert!(h.session.client().is_none());
    }

    #[tokio::test]
    async fn simulation_acquisition_failure_names_the_build_server() {
        let h = harness(JobKind::Simulate, json!({"Fpga": {"IsimFile": "x"}}), "");
        h.session.clone().start().await;

        assert!(h
            .text()
            .contains("[LOCAL] Failed to connect to the build server. "));
        assert!(h.session.is_closed());
    }

    #[tokio::test]
    async fn connect_failure_is_printed_once() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = url::Url::parse(&format!("ws://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);
        let h = harness(JobKind::Build, json!({}), "127.0.0.1");
        let client = ProtocolClient::connect("token", endpoint, h.auth.clone());
        client.wait_closed().await;
        let failure = client.failure().unwrap();
        *h.session.client.lock() = Some(client);

        // start() saw the closed state, then the queued event arrives
        h.session.report_failure(&failure);
        h.session.on_server_error(&failure);
        h.session.on_server_error("job slot lost");

        let text = h.text();
        assert_eq!(text.matches("Server error:").count(), 2);
        assert_eq!(text.matches(failure.as_str()).count(), 1);
        assert!(text.contains("Server error: job slot lost"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let h = harness(JobKind::Build, json!({}), "127.0.0.1");
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        let _sub = h
            .session
            .on_did_close()
            .subscribe(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });

        h.session.close(None);
        h.session.close(None);
        h.session.sink().close();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        let prompts = h.text().matches(crate::terminal::IDLE_PROMPT).count();
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn user_closing_the_terminal_closes_the_session() {
        let h = harness(JobKind::Build, json!({}), "127.0.0.1");
        h.session.sink().close();
        assert!(h.session.is_closed());
    }

    #[test]
    fn queue_banner_is_shown_once() {
        let h = harness(JobKind::Build, json!({}), "127.0.0.1");
        h.session.on_queue(QueueInfo { pos: 3, size: 5 });
        h.session.on_queue(QueueInfo { pos: 2, size: 5 });
        h.session.on_queue(QueueInfo { pos: 1, size: 4 });

        let text = h.text();
        assert_eq!(text.matches("maximum capacity").count(), 1);
        assert!(text.contains("3 out of 5"));
        assert!(text.contains("2 out of 5"));
        assert!(text.contains("1 out of 4"));
        assert_eq!(text.matches("starting soon").count(), 1);
    }

    #[tokio::test]
    async fn closing_the_viewer_closes_the_simulation() {
        let h = harness(JobKind::Simulate, json!({"Fpga": {"IsimFile": "x"}}), "127.0.0.1");
        h.session.on_begin(Some("http://sim/vnc"));
        assert_eq!(h.session.phase(), SessionPhase::Running);
        assert!(h.text().contains("Simulation started on remote server"));

        let viewer = h.viewers.opened.lock()[0].clone();
        viewer.dispose();
        assert!(h.session.is_closed());
    }

    #[tokio::test]
    async fn closing_the_session_disposes_its_viewer() {
        let h = harness(JobKind::Simulate, json!({"Fpga": {"IsimFile": "x"}}), "127.0.0.1");
        h.session.on_begin(Some("http://sim/vnc"));
        h.session.close(None);
        let viewer = h.viewers.opened.lock()[0].clone();
        assert!(viewer.disposed.load(Ordering::SeqCst));
    }
}
