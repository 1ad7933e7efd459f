//! Session state shared by the dispatcher and diagnostic capture.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::protocol::DisplayData;

pub mod demux;
pub mod diagnostics;
pub mod dispatch;

pub use demux::{DisplaySink, LogSink, ReplyDemultiplexer};
pub use diagnostics::DiagnosticCapture;
pub use dispatch::{CommandDispatcher, ExecuteOptions, Outcome, Timeout};

/// Display interceptor; returns whether the message should also be forwarded.
pub type DiagnosticHook = Arc<dyn Fn(&DisplayData) -> bool + Send + Sync>;

/// Identifies one installed hook so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HookId(u64);

/// The single logical connection to the kernel.
///
/// Only the dispatcher flips `busy`, and only diagnostic capture installs
/// hooks; callers observe both. Installed hooks form a stack and the most
/// recent one is active.
#[derive(Default)]
pub struct Session {
    live: AtomicBool,
    busy: AtomicBool,
    hooks: Mutex<Vec<(HookId, DiagnosticHook)>>,
    next_hook: AtomicU64,
}

impl Session {
    /// Fresh session: not live, not busy, no hook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a command is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether the kernel endpoint was last seen running.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Release);
    }

    /// Claim the session for one command, or `None` if it is already busy.
    pub(crate) fn try_acquire(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { session: self })
    }

    /// Currently active diagnostic hook.
    pub fn hook(&self) -> Option<DiagnosticHook> {
        self.hooks.lock().last().map(|(_, hook)| Arc::clone(hook))
    }

    /// Make `hook` the active hook until it is removed.
    pub(crate) fn push_hook(&self, hook: DiagnosticHook) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().push((id, hook));
        id
    }

    /// Remove the hook installed as `id`, wherever it sits in the stack.
    ///
    /// Hooks installed after it stay installed; the one below becomes active
    /// once nothing newer remains.
    pub(crate) fn remove_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        match hooks.iter().position(|(installed, _)| *installed == id) {
            Some(index) => {
                hooks.remove(index);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("live", &self.is_live())
            .field("busy", &self.is_busy())
            .field("hooks", &self.hooks.lock().len())
            .finish()
    }
}

/// Clears the busy flag when dropped.
pub(crate) struct BusyGuard<'a> {
    session: &'a Session,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.session.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_exclusive_and_released() {
        let session = Session::new();
        let guard = session.try_acquire().unwrap();
        assert!(session.is_busy());
        assert!(session.try_acquire().is_none());
        drop(guard);
        assert!(!session.is_busy());
        assert!(session.try_acquire().is_some());
    }

    #[test]
    fn busy_released_on_panic() {
        let session = Session::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = session.try_acquire().unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!session.is_busy());
    }

    #[test]
    fn newest_hook_is_active() {
        let session = Session::new();
        let first: DiagnosticHook = Arc::new(|_: &DisplayData| true);
        let second: DiagnosticHook = Arc::new(|_: &DisplayData| false);
        let first_id = session.push_hook(Arc::clone(&first));
        let second_id = session.push_hook(Arc::clone(&second));
        assert!(Arc::ptr_eq(&session.hook().unwrap(), &second));

        assert!(session.remove_hook(second_id));
        assert!(Arc::ptr_eq(&session.hook().unwrap(), &first));
        assert!(!session.remove_hook(second_id));
        assert!(session.remove_hook(first_id));
        assert!(session.hook().is_none());
    }

    #[test]
    fn removing_lower_hook_keeps_newer_active() {
        let session = Session::new();
        let first: DiagnosticHook = Arc::new(|_: &DisplayData| true);
        let second: DiagnosticHook = Arc::new(|_: &DisplayData| false);
        let first_id = session.push_hook(first);
        let second_id = session.push_hook(Arc::clone(&second));

        assert!(session.remove_hook(first_id));
        assert!(Arc::ptr_eq(&session.hook().unwrap(), &second));
        assert!(session.remove_hook(second_id));
        assert!(session.hook().is_none());
    }
}
