//! Scoped interception of diagnostic display payloads.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

use super::{DiagnosticHook, HookId, Session};
use crate::codec::Value;
use crate::protocol::DisplayData;

/// Whether a display payload carries non-null structured data.
pub fn is_diagnostic(data: &DisplayData) -> bool {
    matches!(data.structured(), Ok(Some(payload)) if !payload.is_null())
}

/// Guard that captures diagnostics while alive.
///
/// Installing shadows whatever hook was active. Dropping the guard (on any
/// exit path, including unwinding) removes only this capture's hook, so
/// guards may be dropped in any order and the newest live capture stays
/// active.
pub struct DiagnosticCapture {
    session: Arc<Session>,
    id: Option<HookId>,
    captured: Arc<Mutex<Vec<Value>>>,
}

impl DiagnosticCapture {
    /// Install a capturing hook on `session`.
    ///
    /// With `passthrough`, captured payloads are also forwarded to display.
    pub fn install(session: Arc<Session>, passthrough: bool) -> Self {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&captured);
        let hook: DiagnosticHook = Arc::new(move |data: &DisplayData| match data.decode() {
            Ok(Some(value)) => {
                store.lock().push(value);
                passthrough
            }
            Ok(None) => true,
            Err(err) => {
                warn!(error = %err, "could not decode diagnostic payload");
                true
            }
        });

        let id = session.push_hook(hook);
        Self {
            session,
            id: Some(id),
            captured,
        }
    }

    /// Snapshot of the payloads captured so far, in arrival order.
    pub fn captured(&self) -> Vec<Value> {
        self.captured.lock().clone()
    }

    /// Number of payloads captured so far.
    pub fn len(&self) -> usize {
        self.captured.lock().len()
    }

    /// Whether nothing has been captured yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore the previous hook and return everything captured.
    pub fn finish(mut self) -> Vec<Value> {
        self.restore();
        std::mem::take(&mut *self.captured.lock())
    }

    fn restore(&mut self) {
        if let Some(id) = self.id.take() {
            self.session.remove_hook(id);
        }
    }
}

impl Drop for DiagnosticCapture {
    fn drop(&mut self) {
        self.restore();
    }
}
