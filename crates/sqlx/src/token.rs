//! Cancellation token for in-flight transactions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Cancels an in-flight `view`/`update` call.
///
/// The transaction envelope checks the token before every SQL
/// round-trip; on SQLite, `cancel` additionally interrupts the
/// statement currently executing on the attached connection. The
/// canceled transaction rolls back and the caller receives
/// [`rb_core::Error::Canceled`].
///
/// Timeouts are expressed by the caller: spawn a timer that calls
/// `cancel` when it fires.
#[derive(Clone, Default)]
pub struct Token {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    handles: Mutex<Vec<rusqlite::InterruptHandle>>,
}

impl Token {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Safe to call from any thread, any number
    /// of times.
    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::SeqCst);
        for handle in self.inner.handles.lock().iter() {
            handle.interrupt();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub(crate) fn attach_sqlite(&self, handle: rusqlite::InterruptHandle) {
        self.inner.handles.lock().push(handle);
    }

    pub(crate) fn clear_handles(&self) {
        self.inner.handles.lock().clear();
    }
}
