#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fitkit_remote::auth::{AuthError, AuthProvider};
use fitkit_remote::connection::ConnectionRegistry;
use fitkit_remote::events::{EventChannel, Subscription};
use fitkit_remote::session::{SessionContext, SessionError, Viewer, ViewerFactory, ViewerSlot};
use fitkit_remote::terminal::{SurfaceRegistry, TerminalSink};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TOKEN: &str = "test-token";
pub const WAIT: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for the expected event")
}

enum ServerOp {
    Text(String),
    Close,
}

/// Server side of one accepted WebSocket.
pub struct ServerConn {
    outgoing: mpsc::UnboundedSender<ServerOp>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.outgoing.send(ServerOp::Text(text.into()));
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(ServerOp::Close);
    }

    /// Next frame the client sent, parsed as JSON.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let text = within(self.incoming.recv())
            .await
            .expect("client connection ended");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Waits for a frame of the given `type`, skipping others.
    pub async fn recv_type(&mut self, kind: &str) -> serde_json::Value {
        loop {
            let frame = self.recv_json().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }
}

struct ServerState {
    token: String,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
    conns: mpsc::UnboundedSender<ServerConn>,
}

/// In-process build server speaking the job protocol over axum WebSockets.
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

impl MockServer {
    pub async fn spawn() -> Self {
        let (conns_tx, conns) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            token: TOKEN.to_string(),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            conns: conns_tx,
        });
        let app = Router::new()
            .route("/", get(upgrade))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, conns }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn endpoint(&self) -> url::Url {
        url::Url::parse(&format!("ws://{}/", self.addr)).unwrap()
    }

    pub async fn accept(&mut self) -> ServerConn {
        within(self.conns.recv()).await.expect("server stopped")
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }
}

async fn upgrade(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let expected = format!("Bearer {}", state.token);
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if presented != Some(expected.as_str()) {
        state.rejected.fetch_add(1, Ordering::SeqCst);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.accepted.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(socket: WebSocket, state: Arc<ServerState>) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let _ = state.conns.send(ServerConn {
        outgoing: out_tx,
        incoming: in_rx,
    });

    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            op = out_rx.recv() => match op {
                Some(ServerOp::Text(text)) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(ServerOp::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = in_tx.send(text);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Auth provider handing out a fixed token until invalidated.
pub struct StaticAuth {
    token: Mutex<Option<String>>,
    pub requests: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl StaticAuth {
    pub fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(Some(token.to_string())),
            requests: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        })
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn get_token(&self, invalidate: bool) -> Result<String, AuthError> {
        if invalidate {
            self.invalidate();
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.token.lock().clone().ok_or(AuthError::Cancelled)
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.token.lock().take();
    }
}

/// Viewer that remembers being disposed.
pub struct RecordedViewer {
    url: String,
    on_did_close: EventChannel<()>,
    disposed: AtomicBool,
}

impl RecordedViewer {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Viewer for RecordedViewer {
    fn url(&self) -> &str {
        &self.url
    }

    fn on_did_close(&self) -> &EventChannel<()> {
        &self.on_did_close
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.on_did_close.emit(&());
        }
    }
}

#[derive(Default)]
pub struct RecordingViewers {
    opened: Mutex<Vec<Arc<RecordedViewer>>>,
}

impl RecordingViewers {
    pub fn opened(&self) -> Vec<Arc<RecordedViewer>> {
        self.opened.lock().clone()
    }
}

impl ViewerFactory for RecordingViewers {
    fn open(&self, url: &str) -> Result<Arc<dyn Viewer>, SessionError> {
        let viewer = Arc::new(RecordedViewer {
            url: url.to_string(),
            on_did_close: EventChannel::new(),
            disposed: AtomicBool::new(false),
        });
        self.opened.lock().push(viewer.clone());
        Ok(viewer)
    }
}

pub fn context(registry: Arc<ConnectionRegistry>, log_debug_info: bool) -> SessionContext {
    context_with_viewers(registry, Arc::new(RecordingViewers::default()), log_debug_info)
}

pub fn context_with_viewers(
    registry: Arc<ConnectionRegistry>,
    viewers: Arc<RecordingViewers>,
    log_debug_info: bool,
) -> SessionContext {
    SessionContext {
        connections: registry,
        viewers: Arc::new(ViewerSlot::new(viewers)),
        log_debug_info,
    }
}

/// An opened sink whose output is recorded.
pub struct Capture {
    pub sink: Arc<TerminalSink>,
    output: Arc<Mutex<Vec<String>>>,
    _sub: Subscription,
}

impl Capture {
    pub fn open(surfaces: &Arc<SurfaceRegistry>) -> Self {
        let sink = TerminalSink::new("test", surfaces.clone());
        let output = Arc::new(Mutex::new(Vec::new()));
        let writer = output.clone();
        let sub = sink
            .on_did_write()
            .subscribe(move |chunk: &String| writer.lock().push(chunk.clone()));
        sink.open();
        Self {
            sink,
            output,
            _sub: sub,
        }
    }

    pub fn text(&self) -> String {
        self.output.lock().concat()
    }

    pub async fn wait_for(&self, needle: &str) {
        within(async {
            while !self.text().contains(needle) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
    }

    /// Asserts that `needles` appear in this order.
    pub fn assert_in_order(&self, needles: &[&str]) {
        let text = self.text();
        let mut from = 0;
        for needle in needles {
            match text[from..].find(needle) {
                Some(offset) => from += offset + needle.len(),
                None => panic!("{needle:?} missing or out of order in:\n{text}"),
            }
        }
    }
}

/// Records every value emitted on `channel`.
pub fn record<T: Clone + Send + 'static>(
    channel: &EventChannel<T>,
) -> (mpsc::UnboundedReceiver<T>, Subscription) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = channel.subscribe(move |value: &T| {
        let _ = tx.send(value.clone());
    });
    (rx, sub)
}
