//! The single authenticated channel to the remote build server.
//!
//! A [`ProtocolClient`] owns one WebSocket. Outbound frames go through an
//! unbounded queue drained by a writer task; inbound frames are parsed and
//! validated by the reader task and fanned out, in arrival order, to typed
//! [`EventChannel`]s grouped in [`ClientEvents`].

pub mod error;
pub mod registry;
mod wire_log;

pub use error::{ConnectionError, ProtocolError};
pub use registry::ConnectionRegistry;
pub use wire_log::Direction;

use crate::auth::AuthProvider;
use crate::events::EventChannel;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use remote_proto::{BuildResult, ClientMessage, FileMapping, Namespace, QueueInfo, ServerMessage};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;
use wire_log::WireLog;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN_REMOVED_NOTICE: &str =
    "\n\nYour local auth token has been removed. You will be prompted to authorize on next connection.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Terminal; a closed client is never reopened.
    Closed,
}

/// WebSocket close code, or [`CloseCode::NEVER_CONNECTED`] when the
/// handshake itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub i32);

impl CloseCode {
    pub const NEVER_CONNECTED: CloseCode = CloseCode(-1);
    pub const NORMAL: CloseCode = CloseCode(1000);
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    pub const ABNORMAL: CloseCode = CloseCode(1006);
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events of one job namespace (`build-*` or `isim-*`).
#[derive(Default)]
pub struct NamespaceEvents {
    /// `isim-begin` carries the viewer URL; `build-begin` carries nothing.
    pub begin: EventChannel<Option<String>>,
    /// `build-end` carries the result; `isim-end` carries nothing.
    pub end: EventChannel<Option<BuildResult>>,
    pub queue: EventChannel<QueueInfo>,
    pub stdout: EventChannel<String>,
    pub stderr: EventChannel<String>,
}

#[derive(Default)]
pub struct ClientEvents {
    pub connected: EventChannel<()>,
    pub closed: EventChannel<CloseCode>,
    pub build: NamespaceEvents,
    pub isim: NamespaceEvents,
    pub project_mapping: EventChannel<FileMapping>,
    pub server_error: EventChannel<String>,
}

impl ClientEvents {
    pub fn namespace(&self, namespace: Namespace) -> &NamespaceEvents {
        match namespace {
            Namespace::Build => &self.build,
            Namespace::Isim => &self.isim,
        }
    }
}

enum Outbound {
    Text(String),
    Close,
}

pub struct ProtocolClient {
    endpoint: Url,
    state: Mutex<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    events: ClientEvents,
    wire_log: WireLog,
    failure: Mutex<Option<String>>,
    close_fired: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl ProtocolClient {
    /// Starts connecting to `endpoint` and returns at once in the
    /// `Connecting` state. Must be called from within a tokio runtime.
    ///
    /// `auth` is told to invalidate its token if the server answers the
    /// handshake with 401.
    pub fn connect(token: &str, endpoint: Url, auth: Arc<dyn AuthProvider>) -> Arc<Self> {
        let client = Arc::new(Self {
            endpoint,
            state: Mutex::new(ConnectionState::Connecting),
            outbound: Mutex::new(None),
            events: ClientEvents::default(),
            wire_log: WireLog::spawn(),
            failure: Mutex::new(None),
            close_fired: AtomicBool::new(false),
            closed_tx: watch::channel(false).0,
        });

        info!(target: "fitkit::connection", endpoint = %client.endpoint, "Connecting to build server...");
        let request = client.handshake_request(token);
        let task_client = client.clone();
        tokio::spawn(async move {
            task_client.run(request, auth).await;
        });
        client
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn events(&self) -> &ClientEvents {
        &self.events
    }

    /// Text of the handshake failure, once the client closed without ever
    /// connecting.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    /// Mirrors traffic to `path` from now on; `None` stops mirroring.
    pub fn set_log_path(&self, path: Option<PathBuf>) {
        self.wire_log.set_path(path);
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.wire_log.path()
    }

    /// Resolves once the `closed` event has fired.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub async fn flush_wire_log(&self) {
        self.wire_log.flush().await;
    }

    /// Queues `message` for the server. Dropped when not connected.
    pub fn send(&self, message: ClientMessage) {
        if !self.is_connected() {
            debug!(
                target: "fitkit::connection",
                kind = message.kind(),
                "not connected; dropping outbound message"
            );
            return;
        }

        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "fitkit::protocol", error = %err, "cannot encode client message");
                return;
            }
        };
        self.wire_log.record(Direction::Client, &message);
        trace!(target: "fitkit::protocol", kind = message.kind(), "send");
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Outbound::Text(text));
        }
    }

    /// Starts a normal close if the client is connected. The `closed` event
    /// fires once the socket has shut down.
    pub fn disconnect(&self) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Closed;
        }
        info!(target: "fitkit::connection", "disconnecting from build server");
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Outbound::Close);
        }
    }

    fn handshake_request(&self, token: &str) -> Result<Request, ProtocolError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|err| ProtocolError::ConnectFailed(err.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| ProtocolError::ConnectFailed(format!("invalid auth token: {err}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }

    async fn run(self: Arc<Self>, request: Result<Request, ProtocolError>, auth: Arc<dyn AuthProvider>) {
        let handshake = match request {
            Ok(request) => connect_async(request)
                .await
                .map_err(|err| ProtocolError::from_connect_error(&err)),
            Err(err) => Err(err),
        };
        match handshake {
            Ok((stream, _response)) => self.serve(stream).await,
            Err(err) => self.connect_failed(err, auth.as_ref()),
        }
    }

    fn connect_failed(&self, err: ProtocolError, auth: &dyn AuthProvider) {
        warn!(target: "fitkit::connection", error = %err, "connection to build server failed");
        let mut message = err.to_string();
        if err.is_auth_rejected() {
            auth.invalidate();
            message.push_str(TOKEN_REMOVED_NOTICE);
        }
        *self.failure.lock() = Some(message.clone());
        *self.state.lock() = ConnectionState::Closed;

        self.events.server_error.emit(&message);
        self.fire_closed(CloseCode::NEVER_CONNECTED);
    }

    async fn serve(&self, stream: WsStream) {
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
        *self.outbound.lock() = Some(tx);
        *self.state.lock() = ConnectionState::Connected;
        info!(target: "fitkit::connection", "Connected to build server");

        let writer = tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    Outbound::Text(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let frame = CloseFrame {
                            code: WsCloseCode::Normal,
                            reason: "".into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        });

        self.events.connected.emit(&());

        let mut code = CloseCode::ABNORMAL;
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => self.receive(&text),
                Ok(Message::Close(frame)) => {
                    code = frame
                        .map(|frame| CloseCode(i32::from(u16::from(frame.code))))
                        .unwrap_or(CloseCode::NO_STATUS);
                }
                Ok(Message::Binary(_)) => {
                    debug!(target: "fitkit::protocol", "ignoring binary frame");
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(target: "fitkit::connection", error = %err, "socket read failed");
                    break;
                }
            }
        }

        writer.abort();
        self.outbound.lock().take();
        *self.state.lock() = ConnectionState::Closed;
        info!(target: "fitkit::connection", code = %code, "Connection closed");
        self.fire_closed(code);
    }

    fn fire_closed(&self, code: CloseCode) {
        if !self.close_fired.swap(true, Ordering::AcqRel) {
            self.events.closed.emit(&code);
            self.closed_tx.send_replace(true);
        }
    }

    fn receive(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                let err = ProtocolError::from(err);
                warn!(target: "fitkit::protocol", error = %err, frame = %text, "Unknown server message");
                return;
            }
        };

        if self.wire_log.path().is_some() {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                self.wire_log.record(Direction::Server, &value);
            }
        }

        self.dispatch(message);
    }

    fn dispatch(&self, message: ServerMessage) {
        let events = &self.events;
        match message {
            ServerMessage::BuildBegin => events.build.begin.emit(&None),
            ServerMessage::BuildEnd { data } => events.build.end.emit(&Some(data)),
            ServerMessage::BuildQueue { data } => events.build.queue.emit(&data),
            ServerMessage::BuildStdout { data } => events.build.stdout.emit(&data),
            ServerMessage::BuildStderr { data } => events.build.stderr.emit(&data),
            ServerMessage::IsimBegin { data } => events.isim.begin.emit(&Some(data)),
            ServerMessage::IsimEnd => events.isim.end.emit(&None),
            ServerMessage::IsimQueue { data } => events.isim.queue.emit(&data),
            ServerMessage::IsimStdout { data } => events.isim.stdout.emit(&data),
            ServerMessage::IsimStderr { data } => events.isim.stderr.emit(&data),
            ServerMessage::ProjectMapping { data } => events.project_mapping.emit(&data),
            ServerMessage::Error { data } => {
                error!(target: "fitkit::protocol", "Server error: {data}");
                events.server_error.emit(&data);
            }
            ServerMessage::Unknown => {
                trace!(target: "fitkit::protocol", "ignoring server message of unknown type");
            }
        }
    }
}
