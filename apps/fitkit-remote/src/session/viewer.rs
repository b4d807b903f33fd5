//! Companion viewers for running simulations.

use crate::events::EventChannel;
use crate::session::SessionError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A surface showing the simulator's screen.
pub trait Viewer: Send + Sync {
    fn url(&self) -> &str;

    /// Fires once, when the viewer goes away for any reason.
    fn on_did_close(&self) -> &EventChannel<()>;

    fn dispose(&self);
}

pub trait ViewerFactory: Send + Sync {
    fn open(&self, url: &str) -> Result<Arc<dyn Viewer>, SessionError>;
}

/// Holds at most one open viewer. Opening another disposes the current one.
pub struct ViewerSlot {
    factory: Arc<dyn ViewerFactory>,
    current: Mutex<Option<Arc<dyn Viewer>>>,
}

impl ViewerSlot {
    pub fn new(factory: Arc<dyn ViewerFactory>) -> Self {
        Self {
            factory,
            current: Mutex::new(None),
        }
    }

    pub fn open(&self, url: &str) -> Result<Arc<dyn Viewer>, SessionError> {
        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            previous.dispose();
        }
        let viewer = self.factory.open(url)?;
        *self.current.lock() = Some(viewer.clone());
        Ok(viewer)
    }

    /// Disposes `viewer`, releasing the slot if it still holds it.
    pub fn close(&self, viewer: &Arc<dyn Viewer>) {
        {
            let mut current = self.current.lock();
            if current
                .as_ref()
                .is_some_and(|held| Arc::ptr_eq(held, viewer))
            {
                current.take();
            }
        }
        viewer.dispose();
    }

    pub fn current(&self) -> Option<Arc<dyn Viewer>> {
        self.current.lock().clone()
    }
}

/// Shows the noVNC stream in the user's web browser.
///
/// A browser tab cannot report being closed, so this viewer only closes
/// when disposed.
pub struct BrowserViewer {
    url: String,
    on_did_close: EventChannel<()>,
    disposed: AtomicBool,
}

impl Viewer for BrowserViewer {
    fn url(&self) -> &str {
        &self.url
    }

    fn on_did_close(&self) -> &EventChannel<()> {
        &self.on_did_close
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.on_did_close.emit(&());
        }
    }
}

pub struct BrowserViewerFactory;

impl ViewerFactory for BrowserViewerFactory {
    fn open(&self, url: &str) -> Result<Arc<dyn Viewer>, SessionError> {
        info!(target: "fitkit::session", url = %url, "opening simulation viewer");
        if let Err(err) = open::that(url) {
            warn!(target: "fitkit::session", error = %err, "cannot launch web browser");
        }
        Ok(Arc::new(BrowserViewer {
            url: url.to_string(),
            on_did_close: EventChannel::new(),
            disposed: AtomicBool::new(false),
        }))
    }
}
