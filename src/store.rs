use std::sync::Arc;

use tokio::sync::watch;

use crate::types::ViewSnapshot;

/// Holds the latest complete `ViewSnapshot`.
///
/// Readers only ever see whole snapshots; a new one replaces the old in a
/// single swap. Publishing is crate-private and serialized by the synchronizer.
#[derive(Debug)]
pub struct ViewStore {
    tx: watch::Sender<Arc<ViewSnapshot>>,
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(ViewSnapshot::default()));
        Self { tx }
    }

    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receivers are woken on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ViewSnapshot>> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, mut snapshot: ViewSnapshot) -> Arc<ViewSnapshot> {
        snapshot.version = self.tx.borrow().version + 1;
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// Drops every cached entity, e.g. after a network switch.
    pub(crate) fn invalidate(&self) -> Arc<ViewSnapshot> {
        self.publish(ViewSnapshot::default())
    }
}
