use crate::auth::AuthPrompt;
use crate::events::Subscription;
use crate::terminal::TerminalSink;
use async_trait::async_trait;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, SetTitle};
use std::io::{self, IsTerminal, Write as _};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use url::Url;

const KEY_POLL: Duration = Duration::from_millis(100);

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if enable {
            match enable_raw_mode() {
                Ok(()) => Self(true),
                Err(err) => {
                    warn!(target: "fitkit::terminal", error = %err, "failed to enable raw mode");
                    Self(false)
                }
            }
        } else {
            Self(false)
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

/// Drives a [`TerminalSink`] from the process's own terminal.
pub struct ConsoleBridge {
    sink: Arc<TerminalSink>,
    output: mpsc::UnboundedReceiver<String>,
    _write_sub: Subscription,
    _input_sub: Subscription,
}

impl ConsoleBridge {
    pub fn attach(sink: Arc<TerminalSink>) -> Self {
        let (tx, output) = mpsc::unbounded_channel();
        let write_sub = sink.on_did_write().subscribe(move |chunk: &String| {
            let _ = tx.send(chunk.clone());
        });
        let input_sub = sink.on_input().subscribe(|data: &String| {
            trace!(target: "fitkit::terminal", bytes = data.len(), "input ignored while job runs");
        });
        Self {
            sink,
            output,
            _write_sub: write_sub,
            _input_sub: input_sub,
        }
    }

    /// Opens the sink and pumps its output to stdout until it closes.
    ///
    /// Without a TTY an armed sink is closed right away, since nobody can
    /// press the key it waits for.
    pub async fn run(mut self) -> io::Result<()> {
        let interactive = io::stdin().is_terminal() && io::stdout().is_terminal();
        let _raw = RawModeGuard::new(interactive);
        if interactive {
            let mut out = io::stdout();
            let _ = crossterm::execute!(out, SetTitle(self.sink.title()));
        }

        self.sink.open();

        let keys = interactive.then(|| {
            let sink = self.sink.clone();
            tokio::task::spawn_blocking(move || read_keys(&sink))
        });

        let mut stdout = tokio::io::stdout();
        loop {
            tokio::select! {
                biased;
                chunk = self.output.recv() => match chunk {
                    Some(chunk) => {
                        stdout.write_all(chunk.as_bytes()).await?;
                        stdout.flush().await?;
                        if !interactive && self.sink.is_armed() {
                            self.sink.close();
                        }
                    }
                    None => break,
                },
                _ = self.sink.closed() => break,
            }
        }
        while let Ok(chunk) = self.output.try_recv() {
            stdout.write_all(chunk.as_bytes()).await?;
        }
        stdout.write_all(b"\r\n").await?;
        stdout.flush().await?;

        if let Some(keys) = keys {
            match keys.await {
                Ok(Err(err)) => warn!(target: "fitkit::terminal", error = %err, "key reader failed"),
                Err(err) => warn!(target: "fitkit::terminal", error = %err, "key reader panicked"),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

fn read_keys(sink: &TerminalSink) -> io::Result<()> {
    while !sink.is_closed() {
        if !event::poll(KEY_POLL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        // Ctrl-C on a running job is a cancellation, not input
        if is_interrupt(&key) && !sink.is_armed() {
            sink.close();
            continue;
        }
        if let Some(input) = key_input(&key) {
            sink.handle_input(&input);
        }
    }
    Ok(())
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('C'))
}

/// Bytes a terminal would send for `key`.
pub fn key_input(key: &KeyEvent) -> Option<String> {
    let input = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let byte = (c.to_ascii_lowercase() as u8) & 0x1f;
            char::from(byte).to_string()
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".into(),
        KeyCode::Tab => "\t".into(),
        KeyCode::Backspace => "\x7f".into(),
        KeyCode::Esc => "\x1b".into(),
        KeyCode::Up => "\x1b[A".into(),
        KeyCode::Down => "\x1b[B".into(),
        KeyCode::Right => "\x1b[C".into(),
        KeyCode::Left => "\x1b[D".into(),
        _ => return None,
    };
    Some(input)
}

/// Token flow prompts on stderr; runs before the console enters raw mode.
pub struct ConsolePrompt;

#[async_trait]
impl AuthPrompt for ConsolePrompt {
    async fn confirm(&self, message: &str) -> bool {
        eprint!("{message}\nContinue (open web browser)? [y/N] ");
        let _ = io::stderr().flush();
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }

    fn show_verification(&self, url: &Url) {
        if let Err(err) = open::that(url.as_str()) {
            warn!(target: "fitkit::auth", error = %err, "cannot open web browser");
        }
        eprintln!("Approve the request in your browser: {url}");
        eprintln!("Waiting for user verification... (Ctrl-C to cancel)");
    }

    async fn cancelled(&self) {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
