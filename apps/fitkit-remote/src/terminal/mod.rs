//! Terminal surfaces for remote job output.
//!
//! A [`TerminalSink`] turns the asynchronous text of a job into an ordered
//! stream of terminal chunks published on [`TerminalSink::on_did_write`].
//! Output issued before the surface is opened is queued and replayed on
//! `open`. Once a job is over the sink is armed: the next keypress closes it,
//! and so does another surface opening.

pub mod console;
mod registry;

pub use registry::SurfaceRegistry;

use crate::events::EventChannel;
use crossterm::style::{style, Color, Stylize};
use parking_lot::{Mutex, ReentrantMutex};
use remote_proto::FileMapping;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::trace;

pub const IDLE_PROMPT: &str = "Terminal is inactive. Press any key to close...";

pub(crate) fn paint(text: &str, color: Color) -> String {
    style(text).with(color).to_string()
}

pub(crate) fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[derive(Debug)]
enum SinkState {
    Pending { queue: VecDeque<String>, armed: bool },
    Open { armed: bool },
    Closed,
}

pub struct TerminalSink {
    id: u64,
    title: String,
    // reentrant so listeners may write back into the sink they observe
    state: ReentrantMutex<RefCell<SinkState>>,
    opening: AtomicBool,
    mapping: Mutex<Option<FileMapping>>,
    on_did_write: EventChannel<String>,
    on_input: EventChannel<String>,
    on_did_close: EventChannel<()>,
    closed_tx: watch::Sender<bool>,
    surfaces: Arc<SurfaceRegistry>,
    this: Weak<TerminalSink>,
}

impl TerminalSink {
    pub fn new(title: impl Into<String>, surfaces: Arc<SurfaceRegistry>) -> Arc<Self> {
        let title = title.into();
        Arc::new_cyclic(|this| Self {
            id: surfaces.allocate_id(),
            title,
            state: ReentrantMutex::new(RefCell::new(SinkState::Pending {
                queue: VecDeque::new(),
                armed: false,
            })),
            opening: AtomicBool::new(false),
            mapping: Mutex::new(None),
            on_did_write: EventChannel::new(),
            on_input: EventChannel::new(),
            on_did_close: EventChannel::new(),
            closed_tx: watch::channel(false).0,
            surfaces,
            this: this.clone(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Terminal-ready chunks, in the order they were written.
    pub fn on_did_write(&self) -> &EventChannel<String> {
        &self.on_did_write
    }

    /// Input that was not consumed by the idle-close prompt.
    pub fn on_input(&self) -> &EventChannel<String> {
        &self.on_input
    }

    pub fn on_did_close(&self) -> &EventChannel<()> {
        &self.on_did_close
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock().borrow(), SinkState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock().borrow(), SinkState::Closed)
    }

    pub fn is_armed(&self) -> bool {
        matches!(
            *self.state.lock().borrow(),
            SinkState::Pending { armed: true, .. } | SinkState::Open { armed: true }
        )
    }

    /// Marks the surface ready and replays queued output. Any other armed
    /// surface is closed first.
    pub fn open(&self) {
        if self.opening.swap(true, Ordering::AcqRel) || self.is_closed() {
            return;
        }

        for other in self.surfaces.armed_except(self.id) {
            trace!(target: "fitkit::terminal", surface = other.id, "evicting idle surface");
            other.handle_input(" ");
        }
        self.surfaces.register(self.id, self.this.clone());

        let guard = self.state.lock();
        loop {
            let next = {
                let mut state = guard.borrow_mut();
                match &mut *state {
                    SinkState::Pending { queue, armed } => match queue.pop_front() {
                        Some(chunk) => Some(chunk),
                        None => {
                            let armed = *armed;
                            *state = SinkState::Open { armed };
                            None
                        }
                    },
                    _ => None,
                }
            };
            match next {
                Some(chunk) => self.on_did_write.emit(&chunk),
                None => break,
            }
        }
    }

    /// Writes one line. Mapped server paths are substituted first.
    pub fn write_line(&self, line: &str) {
        let line = match self.mapping.lock().as_ref() {
            Some(mapping) => mapping.apply(line),
            None => line.to_owned(),
        };
        self.emit_or_queue(format!("{}\r\n", normalize_newlines(&line)));
    }

    pub fn error_line(&self, line: &str) {
        self.write_line(&paint(line, Color::Red));
    }

    /// Writes a raw chunk. No line ending is added and no mapping applies.
    pub fn write(&self, chunk: &str) {
        self.emit_or_queue(normalize_newlines(chunk));
    }

    /// Installs the server path table; `None` removes it.
    pub fn load_file_mapping(&self, mapping: Option<FileMapping>) {
        *self.mapping.lock() = mapping;
    }

    pub fn arm_idle_close(&self) {
        let guard = self.state.lock();
        let newly_armed = {
            let mut state = guard.borrow_mut();
            match &mut *state {
                SinkState::Closed => false,
                SinkState::Pending { armed, .. } | SinkState::Open { armed } => {
                    if *armed {
                        false
                    } else {
                        *armed = true;
                        true
                    }
                }
            }
        };
        if newly_armed {
            self.write_line(&format!("\n\n{}", paint(IDLE_PROMPT, Color::DarkGrey)));
        }
    }

    /// Feeds user input. While armed any input closes the surface;
    /// otherwise it is published on [`TerminalSink::on_input`].
    pub fn handle_input(&self, data: &str) {
        let guard = self.state.lock();
        let armed = match &*guard.borrow() {
            SinkState::Closed => return,
            SinkState::Pending { armed, .. } | SinkState::Open { armed } => *armed,
        };
        if armed {
            drop(guard);
            self.close();
        } else {
            self.on_input.emit(&data.to_owned());
        }
    }

    pub fn close(&self) {
        {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if matches!(*state, SinkState::Closed) {
                return;
            }
            *state = SinkState::Closed;
        }
        trace!(target: "fitkit::terminal", surface = self.id, title = %self.title, "surface closed");
        self.surfaces.unregister(self.id);
        self.mapping.lock().take();
        self.closed_tx.send_replace(true);
        self.on_did_close.emit(&());
    }

    /// Resolves once the sink is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn emit_or_queue(&self, chunk: String) {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            match &mut *state {
                SinkState::Closed => return,
                SinkState::Pending { queue, .. } => {
                    queue.push_back(chunk);
                    return;
                }
                SinkState::Open { .. } => {}
            }
        }
        self.on_did_write.emit(&chunk);
    }
}
