//! Explicit destruction notifications.
//!
//! Registries that must prune entries when a context disappears subscribe
//! here instead of relying on drop order. Watchers run synchronously, once,
//! on the call that destroys the lifeline.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;

// ============================================================================
// Types
// ============================================================================

/// Callback run when the lifeline is destroyed.
type Watcher = Box<dyn FnOnce() + Send>;

/// Handle for cancelling a destruction watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Lifeline state guarded by a single lock.
#[derive(Default)]
struct LifelineState {
    destroyed: bool,
    next_id: u64,
    watchers: Vec<(WatchId, Watcher)>,
}

// ============================================================================
// Lifeline
// ============================================================================

/// One-shot destruction signal with cancellable subscribers.
#[derive(Default)]
pub struct Lifeline {
    state: Mutex<LifelineState>,
}

impl fmt::Debug for Lifeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lifeline")
            .field("destroyed", &state.destroyed)
            .field("watchers", &state.watchers.len())
            .finish()
    }
}

impl Lifeline {
    /// Creates a live lifeline.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once [`destroy`](Self::destroy) has been called.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Subscribes to destruction.
    ///
    /// If the lifeline is already destroyed the watcher runs immediately
    /// and `None` is returned.
    pub fn watch(&self, watcher: impl FnOnce() + Send + 'static) -> Option<WatchId> {
        let mut state = self.state.lock();
        if state.destroyed {
            drop(state);
            watcher();
            return None;
        }

        let id = WatchId(state.next_id);
        state.next_id += 1;
        state.watchers.push((id, Box::new(watcher)));
        Some(id)
    }

    /// Cancels a watcher. Unknown IDs are ignored.
    pub fn unwatch(&self, id: WatchId) {
        self.state.lock().watchers.retain(|(watch_id, _)| *watch_id != id);
    }

    /// Destroys the lifeline and runs every watcher in subscription order.
    ///
    /// Returns `false` if it was already destroyed.
    pub fn destroy(&self) -> bool {
        let watchers = {
            let mut state = self.state.lock();
            if state.destroyed {
                return false;
            }
            state.destroyed = true;
            std::mem::take(&mut state.watchers)
        };

        for (_, watcher) in watchers {
            watcher();
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
