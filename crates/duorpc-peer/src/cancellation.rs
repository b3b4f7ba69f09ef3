//! Cancellation primitive shared by both directions of the protocol.
//!
//! A [`CancellationSource`] owns the trigger; any number of cloned
//! [`CancellationToken`]s observe it. Registered hooks fire exactly once,
//! on the thread that triggers the source; a hook registered after the
//! trigger runs immediately. The already-triggered check is a single
//! short-lived lock acquisition.
//!
//! Outbound cancellation links a token to a remote request id (the hook
//! emits the `$/cancelRequest` frame); inbound cancellation hands the
//! token to the target handler, which decides whether to honor it.

use std::pin::pin;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct State {
    canceled: bool,
    hooks: Vec<Hook>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// The triggering side of a cancellation pair.
#[derive(Clone, Default)]
pub struct CancellationSource {
    inner: Arc<Inner>,
}

/// The observing side of a cancellation pair.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: self.inner.clone(),
        }
    }

    /// Triggers cancellation. Hooks registered so far run exactly once,
    /// outside the internal lock; repeated calls are no-ops.
    pub fn cancel(&self) {
        let hooks = {
            let mut state = self.inner.state.lock().unwrap();
            if state.canceled {
                return;
            }
            state.canceled = true;
            std::mem::take(&mut state.hooks)
        };
        self.inner.notify.notify_waiters();
        for hook in hooks {
            hook();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().unwrap().canceled
    }
}

impl CancellationToken {
    /// A token that can never be canceled, for handlers that did not ask
    /// for one.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.state.lock().unwrap().canceled
    }

    /// Resolves when the source is canceled; resolves immediately if it
    /// already was.
    pub async fn canceled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        // Register interest before checking the flag so a trigger between
        // the check and the await cannot be missed.
        notified.as_mut().enable();
        if self.is_canceled() {
            return;
        }
        notified.await;
    }

    /// Registers a hook to run on cancellation. If the source already
    /// triggered, the hook runs immediately on this thread.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let hook: Hook = Box::new(hook);
        let pending = {
            let mut state = self.inner.state.lock().unwrap();
            if state.canceled {
                Some(hook)
            } else {
                state.hooks.push(hook);
                None
            }
        };
        if let Some(hook) = pending {
            hook();
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
