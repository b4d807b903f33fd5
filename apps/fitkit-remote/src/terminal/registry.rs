use super::TerminalSink;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Open terminal surfaces of one process.
#[derive(Default)]
pub struct SurfaceRegistry {
    next_id: AtomicU64,
    open: Mutex<Vec<(u64, Weak<TerminalSink>)>>,
}

impl SurfaceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn register(&self, id: u64, sink: Weak<TerminalSink>) {
        let mut open = self.open.lock();
        open.retain(|(_, weak)| weak.strong_count() > 0);
        if !open.iter().any(|(existing, _)| *existing == id) {
            open.push((id, sink));
        }
    }

    pub(super) fn unregister(&self, id: u64) {
        self.open.lock().retain(|(existing, _)| *existing != id);
    }

    /// Armed surfaces other than `id`, snapshotted so the caller can close
    /// them without holding the registry lock.
    pub(super) fn armed_except(&self, id: u64) -> Vec<Arc<TerminalSink>> {
        let others: Vec<Arc<TerminalSink>> = self
            .open
            .lock()
            .iter()
            .filter(|(existing, _)| *existing != id)
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        others.into_iter().filter(|sink| sink.is_armed()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}
