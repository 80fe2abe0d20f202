use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::error;

/// Callback invoked with every parsed inbound payload.
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Handle returned by registration, used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered message handlers, invoked in registration order.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(ListenerId, MessageHandler)>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Invoke every handler with `payload`.  A panicking handler is logged and
    /// skipped; the rest still run.  Returns how many handlers completed.
    ///
    /// The handler list is snapshotted first, so handlers may register or
    /// remove listeners without deadlocking.
    pub fn dispatch(&self, payload: &Value) -> usize {
        let snapshot: Vec<(ListenerId, MessageHandler)> = self.handlers.read().clone();

        let mut completed = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => completed += 1,
                Err(_) => error!(listener = id.0, "message handler panicked"),
            }
        }
        completed
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("handlers", &self.len())
            .finish()
    }
}
